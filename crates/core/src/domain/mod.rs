pub mod conversation;
pub mod email;
pub mod prospect;
