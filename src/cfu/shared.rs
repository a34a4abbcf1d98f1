use std::sync::{Arc, Mutex, MutexGuard};

use super::InstructionChannel;
use crate::error::ChannelError;

/// Cloneable handle to one accelerator instance.
///
/// The accelerator keeps a single implicit tensor/parameter state, so a whole
/// invocation (staging plus every dispatch) must run under one lock.
#[derive(Debug, Default)]
pub struct SharedChannel<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SharedChannel<C> {
    fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<C: InstructionChannel> SharedChannel<C> {
    pub fn new(channel: C) -> Self { Self { inner: Arc::new(Mutex::new(channel)) } }

    pub fn lock(&self) -> Result<MutexGuard<'_, C>, ChannelError> {
        self.inner.lock().map_err(|_| ChannelError::Poisoned)
    }

    /// Run `f` with exclusive access for its whole duration.
    pub fn with<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R, ChannelError> {
        let mut guard = self.lock()?;
        Ok(f(&mut *guard))
    }

    /// Recover the channel once every other handle is gone.
    pub fn try_unwrap(self) -> Result<C, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(m) => Ok(m.into_inner().unwrap_or_else(|e| e.into_inner())),
            Err(inner) => Err(Self { inner }),
        }
    }
}
