use anyhow::bail;

/// Protocol parameters shared by both ends of a transfer.
pub struct ArqConfig {
    /// The maximum number of *packets* (not bytes) that may be in flight, i.e.
    ///  sent but not yet acknowledged, at any time. `1` degenerates to
    ///  stop-and-wait.
    pub window_size: u32,

    /// Upper bound for a single message's payload. Both ends must agree on
    ///  this value; the sender rejects larger messages, it does not split them.
    pub max_payload_len: usize,

    /// Retransmission timeout in simulated time units.
    ///
    /// Choosing this value too small causes spurious retransmissions of
    ///  packets whose acknowledgment is still in flight; choosing it too big
    ///  delays recovery from loss. Somewhere above twice the one-way channel
    ///  delay is a reasonable starting point.
    pub retransmission_timeout: f64,
}

impl Default for ArqConfig {
    fn default() -> ArqConfig {
        ArqConfig {
            window_size: 8,
            max_payload_len: 1024,
            retransmission_timeout: 20.0,
        }
    }
}

impl ArqConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size < 1 {
            bail!("window size must be at least 1");
        }
        if self.max_payload_len < 1 {
            bail!("maximum payload length must be at least 1");
        }
        if !(self.retransmission_timeout > 0.0) {
            bail!("retransmission timeout must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default_is_valid(8, 1024, 20.0, true)]
    #[case::stop_and_wait(1, 1, 0.1, true)]
    #[case::zero_window(0, 1024, 20.0, false)]
    #[case::zero_payload(8, 0, 20.0, false)]
    #[case::zero_timeout(8, 1024, 0.0, false)]
    #[case::negative_timeout(8, 1024, -1.0, false)]
    #[case::nan_timeout(8, 1024, f64::NAN, false)]
    fn test_validate(
        #[case] window_size: u32,
        #[case] max_payload_len: usize,
        #[case] retransmission_timeout: f64,
        #[case] expected_valid: bool,
    ) {
        let config = ArqConfig {
            window_size,
            max_payload_len,
            retransmission_timeout,
        };
        assert_eq!(config.validate().is_ok(), expected_valid);
    }
}
