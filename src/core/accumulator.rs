//! Applies decoded fragments to the message a session is filling.

use std::fmt;

use crate::core::codec::DeltaFragment;
use crate::core::message::{Seal, WeakMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulateError {
    /// The surface dropped the message while the session was streaming.
    TargetDropped,
    Sealed(Seal),
}

impl fmt::Display for AccumulateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccumulateError::TargetDropped => write!(f, "target message no longer exists"),
            AccumulateError::Sealed(seal) => write!(f, "target message is sealed ({seal:?})"),
        }
    }
}

impl std::error::Error for AccumulateError {}

/// Content length of the target before and after an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub previous_len: usize,
    pub new_len: usize,
}

/// Appends the fragment to the target. The fragment is consumed, so the same
/// fragment cannot be applied twice.
pub fn apply(fragment: DeltaFragment, target: &WeakMessage) -> Result<Applied, AccumulateError> {
    let shared = target.upgrade().ok_or(AccumulateError::TargetDropped)?;
    let mut message = shared.write();
    let previous_len = message.content().len();
    message
        .push_str(fragment.text())
        .map_err(|sealed| AccumulateError::Sealed(sealed.0))?;
    Ok(Applied {
        previous_len,
        new_len: message.content().len(),
    })
}
