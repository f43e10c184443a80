// Library root: the scoring domain, the submission pipeline and the session
// that ties them to the real-time channels.

pub mod messages;
pub mod pipeline;
pub mod scoring;
pub mod session;
