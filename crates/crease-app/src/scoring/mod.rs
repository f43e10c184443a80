// Cricket scoring domain: the projection, how it is loaded and updated, and
// the match workflow around it.

pub mod applier;
pub mod delivery;
pub mod dismissal;
pub mod projection;
pub mod snapshot;
pub mod workflow;
