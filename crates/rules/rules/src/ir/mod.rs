pub mod action;
pub mod condition;
pub mod expr;
pub mod goal;
pub mod rule;
