// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ipr_core::IprError;
use std::sync::Arc;

/// Upstream data source able to hand over a pre-built model.
///
/// `Ok(None)` means the producer exists but has nothing to offer yet.
pub trait ModelProducer<M>: Send + Sync {
    fn produce(&self) -> Result<Option<Arc<M>>, IprError>;
}

impl<M, F> ModelProducer<M> for F
where
    F: Fn() -> Result<Option<Arc<M>>, IprError> + Send + Sync,
{
    fn produce(&self) -> Result<Option<Arc<M>>, IprError> {
        self()
    }
}

/// Producer that always hands out the same model.
#[derive(Debug)]
pub struct FixedModelProducer<M> {
    model: Arc<M>,
}

impl<M> FixedModelProducer<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self { model }
    }
}

impl<M: Send + Sync> ModelProducer<M> for FixedModelProducer<M> {
    fn produce(&self) -> Result<Option<Arc<M>>, IprError> {
        Ok(Some(Arc::clone(&self.model)))
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedModelProducer, ModelProducer};
    use ipr_core::IprError;
    use std::sync::Arc;

    #[test]
    fn closures_and_fixed_producers_share_the_contract() {
        let fixed = FixedModelProducer::new(Arc::new(7u8));
        assert_eq!(fixed.produce().expect("fixed").as_deref(), Some(&7));

        let empty = || -> Result<Option<Arc<u8>>, IprError> { Ok(None) };
        assert!(empty.produce().expect("closure").is_none());

        let producers: Vec<Box<dyn ModelProducer<u8>>> = vec![Box::new(fixed), Box::new(empty)];
        assert_eq!(producers.len(), 2);
    }
}
