use thiserror::Error;

use crate::{
    control::{ControlError, ValidationError},
    device::DeviceError,
    profile_store::ProfileError,
};

// The crate-wide error type
#[derive(Debug, Error)]
pub enum BntError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

impl From<ControlError> for BntError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Device(e) => BntError::Device(e),
            ControlError::Validation(e) => BntError::Validation(e),
        }
    }
}

impl BntError {
    // Validation problems are held on screen a little longer
    pub fn is_validation(&self) -> bool {
        match self {
            BntError::Validation(_) => true,
            BntError::Profile(ProfileError::Invalid { .. }) => true,
            _ => false,
        }
    }
}
