/// Basic PCM format extracted from a WAV source.
#[derive(Debug, Clone, Copy)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
}

impl PcmFormat {
    /// Checks the constraints the Opus voice path imposes on its PCM input.
    pub fn validate_for_voice(&self) -> Result<(), String> {
        if self.sample_rate != 48_000 {
            return Err(format!(
                "sample rate must be 48000 Hz, got {}",
                self.sample_rate
            ));
        }
        if self.bits_per_sample != 16 {
            return Err(format!(
                "samples must be 16-bit PCM, got {} bits",
                self.bits_per_sample
            ));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(format!(
                "channel count must be 1 or 2, got {}",
                self.channels
            ));
        }
        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Sample frames in one 60 ms chunk.
    pub fn frames_per_chunk(&self) -> usize {
        self.sample_rate as usize * 6 / 100
    }

    /// Bytes in one 60 ms chunk of interleaved PCM.
    pub fn bytes_per_chunk(&self) -> usize {
        self.frames_per_chunk() * self.channels as usize * self.bytes_per_sample()
    }
}
