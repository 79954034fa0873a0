//! Per-session request parameters for the text-generation backend.
//!
//! The parameter bag is stored with each chat session. Updates are validated
//! as a whole and then merged onto the stored value: `model` and `max_tokens`
//! are always replaced, every optional field only when the update carries a
//! value.

use serde::{Deserialize, Serialize};

use std::ops::RangeInclusive;

use crate::error::ParameterError;

/// Response length assigned to new sessions.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
/// Temperature used by [`ChatSessionParameters::recommended`].
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
/// Nucleus-sampling mass used by [`ChatSessionParameters::recommended`].
pub const DEFAULT_TOP_P: f32 = 0.0;

pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 10..=4096;
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
pub const TOP_P_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const PENALTY_RANGE: RangeInclusive<f32> = -2.0..=2.0;
pub const MAX_STOP_SEQUENCES: usize = 4;

/// Request parameters shared by every request sent within one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSessionParameters {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

impl ChatSessionParameters {
    /// Parameters of a freshly created session: the model, the default
    /// response length and nothing else.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            suffix: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            presence_penalty: None,
            frequency_penalty: None,
        }
    }

    /// Request defaults suggested to interactive callers (temperature and
    /// top_p filled in).
    pub fn recommended(model: impl Into<String>) -> Self {
        Self {
            temperature: Some(DEFAULT_TEMPERATURE),
            top_p: Some(DEFAULT_TOP_P),
            ..Self::new(model)
        }
    }

    /// Check every field against its bound. NaN never satisfies a range.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.model.trim().is_empty() {
            return Err(ParameterError::EmptyModel);
        }
        if !MAX_TOKENS_RANGE.contains(&self.max_tokens) {
            return Err(ParameterError::MaxTokensOutOfRange {
                value: self.max_tokens,
                min: *MAX_TOKENS_RANGE.start(),
                max: *MAX_TOKENS_RANGE.end(),
            });
        }
        check_range("temperature", self.temperature, &TEMPERATURE_RANGE)?;
        check_range("top_p", self.top_p, &TOP_P_RANGE)?;
        if self.stop.len() > MAX_STOP_SEQUENCES {
            return Err(ParameterError::TooManyStopSequences {
                count: self.stop.len(),
                max: MAX_STOP_SEQUENCES,
            });
        }
        check_range("presence_penalty", self.presence_penalty, &PENALTY_RANGE)?;
        check_range("frequency_penalty", self.frequency_penalty, &PENALTY_RANGE)?;
        Ok(())
    }

    /// Apply `incoming` onto `self`.
    ///
    /// `model` and `max_tokens` are overwritten unconditionally. Optional
    /// fields (and `stop`) are overwritten only when `incoming` carries a
    /// value; absent fields keep the current value.
    pub fn merge(&mut self, incoming: &ChatSessionParameters) {
        self.model = incoming.model.clone();
        self.max_tokens = incoming.max_tokens;
        if incoming.suffix.is_some() {
            self.suffix = incoming.suffix.clone();
        }
        if incoming.temperature.is_some() {
            self.temperature = incoming.temperature;
        }
        if incoming.top_p.is_some() {
            self.top_p = incoming.top_p;
        }
        if !incoming.stop.is_empty() {
            self.stop = incoming.stop.clone();
        }
        if incoming.presence_penalty.is_some() {
            self.presence_penalty = incoming.presence_penalty;
        }
        if incoming.frequency_penalty.is_some() {
            self.frequency_penalty = incoming.frequency_penalty;
        }
    }

    /// Non-mutating form of [`merge`](Self::merge).
    pub fn merged_with(&self, incoming: &ChatSessionParameters) -> Self {
        let mut merged = self.clone();
        merged.merge(incoming);
        merged
    }
}

fn check_range(
    field: &'static str,
    value: Option<f32>,
    range: &RangeInclusive<f32>,
) -> Result<(), ParameterError> {
    match value {
        Some(v) if !range.contains(&v) => Err(ParameterError::OutOfRange {
            field,
            value: v,
            min: *range.start(),
            max: *range.end(),
        }),
        _ => Ok(()),
    }
}
