//! The injected path translator: `translate(target_side, path_on_source) ->
//! Option<path_on_target>`. `None` means "do not propagate"; the engine
//! silently drops such changes (spec §6).

use crate::types::Side;

pub trait Translator: Send + Sync {
    fn translate(&self, target_side: Side, path_on_source: &str) -> Option<String>;
}

/// Adapts a plain closure to [`Translator`], for the common case of a
/// stateless mapping function.
pub struct FnTranslator<F>(pub F)
where
    F: Fn(Side, &str) -> Option<String> + Send + Sync;

impl<F> Translator for FnTranslator<F>
where
    F: Fn(Side, &str) -> Option<String> + Send + Sync,
{
    fn translate(&self, target_side: Side, path_on_source: &str) -> Option<String> {
        (self.0)(target_side, path_on_source)
    }
}
