pub mod assign;
pub mod layout;
