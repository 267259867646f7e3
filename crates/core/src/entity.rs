//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Users are entities, not aggregates: their state is changed by the profile
/// and KYC collaborators, never replayed from events.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
