//! Client for the module-mode control server's line protocol (spec.md §6
//! "EXTERNAL INTERFACES"); sends one command per invocation and prints the
//! server's reply.
use clap::{Parser, Subcommand};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

#[derive(Parser, Debug)]
pub struct Args {
    /// Address of a running engine's control server, e.g. `127.0.0.1:10500`.
    #[clap(long, default_value = "127.0.0.1:10500")]
    addr: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Pause,
    Resume,
    Terminate,
    Status,
    GrammarEnable { id: usize },
    GrammarDisable { id: usize },
}

impl Command {
    fn to_line(&self) -> String {
        match self {
            Command::Pause => "PAUSE".to_string(),
            Command::Resume => "RESUME".to_string(),
            Command::Terminate => "TERMINATE".to_string(),
            Command::Status => "STATUS".to_string(),
            Command::GrammarEnable { id } => format!("GRAMMAR_ENABLE {id}"),
            Command::GrammarDisable { id } => format!("GRAMMAR_DISABLE {id}"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    julius_rs::setup_logging();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.addr)?;
    let mut writer = stream.try_clone()?;
    writeln!(writer, "{}", args.command.to_line())?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    print!("{reply}");
    Ok(())
}
