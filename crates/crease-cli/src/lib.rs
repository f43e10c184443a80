// Line-oriented front end for a scoring session.

pub mod input;
pub mod render;
