//! WAV-file [`AudioInput`] implementation via `hound` (spec.md §6 "Sample
//! format: 16-bit signed PCM, 1 channel").
use super::{AudioInput, ReadOutcome};
use crate::error::{EngineError, EngineResult};
use hound::{WavReader, WavSpec};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub struct WavFileInput {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
}

impl WavFileInput {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let reader = WavReader::open(path)
            .map_err(|e| EngineError::Malformed(format!("cannot open wav file: {e}")))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(EngineError::FatalConfig(format!(
                "expected mono audio, got {} channels",
                spec.channels
            )));
        }
        if spec.bits_per_sample != 16 {
            return Err(EngineError::FatalConfig(format!(
                "expected 16-bit PCM, got {} bits",
                spec.bits_per_sample
            )));
        }
        Ok(Self { reader, spec })
    }
}

impl AudioInput for WavFileInput {
    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn read(&mut self, buf: &mut [i16]) -> EngineResult<ReadOutcome> {
        let mut n = 0;
        for (slot, sample) in buf.iter_mut().zip(self.reader.samples::<i16>()) {
            *slot = sample.map_err(|e| EngineError::Malformed(format!("wav decode error: {e}")))?;
            n += 1;
        }
        if n == 0 {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::Read(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavWriter};

    fn write_test_wav(path: &Path, samples: &[i16]) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn reads_back_written_samples() {
        let dir = std::env::temp_dir();
        let path = dir.join("julius_rs_test_tone.wav");
        write_test_wav(&path, &[1, -1, 2, -2, 3, -3]);
        let mut input = WavFileInput::open(&path).unwrap();
        assert_eq!(input.sample_rate(), 16_000);
        let mut buf = vec![0i16; 10];
        let outcome = input.read(&mut buf).unwrap();
        assert_eq!(outcome, ReadOutcome::Read(6));
        assert_eq!(&buf[..6], &[1, -1, 2, -2, 3, -3]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_read_reports_eof() {
        let dir = std::env::temp_dir();
        let path = dir.join("julius_rs_test_empty.wav");
        write_test_wav(&path, &[]);
        let mut input = WavFileInput::open(&path).unwrap();
        let mut buf = vec![0i16; 4];
        assert_eq!(input.read(&mut buf).unwrap(), ReadOutcome::Eof);
        std::fs::remove_file(&path).ok();
    }
}
