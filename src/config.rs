//! Serializable processor settings.
//!
//! Every field has a default, so a partial document (say, only `lookahead`
//! and `threshold`) deserializes into a complete configuration.

use serde::{Deserialize, Serialize};

use crate::dsp::LimiterMode;

/// Sample rate assumed until the host reports one.
pub const DEFAULT_SAMPLE_RATE : f64 = 44100.0;
/// Lookahead ring size when none is given.
pub const DEFAULT_MAX_LOOKAHEAD : usize = 256;
/// Lookahead in samples when none is given.
pub const DEFAULT_LOOKAHEAD : usize = 100;
/// Limiter release in seconds.
pub const DEFAULT_RELEASE : f64 = 1.0;

/// Settings for [`Delay`](crate::dsp::Delay) and
/// [`DelayWithLinearInterpolation`](crate::dsp::DelayWithLinearInterpolation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig
{
    /// Number of channels.
    pub channels : usize,
    /// Longest delay in samples.
    pub max_delay : usize,
    /// Delay in samples. The integer line rounds it.
    pub delay : f64,
    /// Sample rate in Hz.
    pub sample_rate : f64
}
impl Default for DelayConfig
{
    fn default() -> Self
    {
        Self { channels : 2, max_delay : 44100, delay : 0.0, sample_rate : DEFAULT_SAMPLE_RATE }
    }
}

/// Settings for [`Limiter`](crate::dsp::Limiter).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig
{
    /// Number of channels.
    pub channels : usize,
    /// Size of the lookahead ring; the lookahead stays below it.
    pub max_lookahead : usize,
    /// Lookahead (and latency) in samples.
    pub lookahead : usize,
    /// Linear output ceiling.
    pub threshold : f64,
    /// Linear output gain.
    pub preamp : f64,
    /// Linear input gain, applied before analysis.
    pub postamp : f64,
    /// Release time in seconds.
    pub release : f64,
    /// Release and ramp shape.
    pub mode : LimiterMode,
    /// Remove DC before analysis.
    pub block_dc : bool,
    /// Sample rate in Hz.
    pub sample_rate : f64
}
impl Default for LimiterConfig
{
    fn default() -> Self
    {
        Self
        {
            channels : 2,
            max_lookahead : DEFAULT_MAX_LOOKAHEAD,
            lookahead : DEFAULT_LOOKAHEAD,
            threshold : 1.0,
            preamp : 1.0,
            postamp : 1.0,
            release : DEFAULT_RELEASE,
            mode : LimiterMode::default(),
            block_dc : true,
            sample_rate : DEFAULT_SAMPLE_RATE
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dsp::{DelayWithLinearInterpolation, Limiter};

    #[test]
    fn test_partial_limiter_config()
    {
        let config : LimiterConfig = serde_json::from_str(r#"{ "lookahead": 32, "mode": "linear", "block_dc": false }"#).unwrap();
        assert_eq!(config.lookahead, 32);
        assert_eq!(config.mode, LimiterMode::Linear);
        assert!(!config.block_dc);
        assert_eq!(config.max_lookahead, DEFAULT_MAX_LOOKAHEAD);
        assert_eq!(config.threshold, 1.0);
    }

    #[test]
    fn test_limiter_config_reads_back_clamped()
    {
        let config = LimiterConfig { max_lookahead : 16, lookahead : 64, release : -1.0, ..LimiterConfig::default() };
        let limiter = Limiter::from_config(&config).unwrap();
        let applied = limiter.config();
        assert_eq!(applied.lookahead, 15);
        assert_eq!(applied.release, 1e-4);
        assert_eq!(applied.channels, 2);
    }

    #[test]
    fn test_delay_config_builds_fractional_line()
    {
        let config : DelayConfig = serde_json::from_str(r#"{ "channels": 1, "max_delay": 64, "delay": 12.75 }"#).unwrap();
        let delay = DelayWithLinearInterpolation::from_config(&config).unwrap();
        assert_eq!(delay.channels(), 1);
        assert_eq!(delay.size(), 12.75);
        assert_eq!(delay.sample_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_unknown_mode_rejected()
    {
        let result = serde_json::from_str::<LimiterConfig>(r#"{ "mode": "brickwall" }"#);
        assert!(result.is_err());
    }
}
