//! Entity trait: identity + continuity across state changes.

/// Jobs and payments are entities: they keep their identity while their
/// status moves through a lifecycle, and stores key them by `id()`.
pub trait Entity {
    /// Noun used in store messages ("transcription", "payment").
    const KIND: &'static str;

    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    fn id(&self) -> &Self::Id;

    /// `"{kind} {id}"`, as reported by not-found and duplicate errors.
    fn label(&self) -> String {
        format!("{} {}", Self::KIND, self.id())
    }
}
