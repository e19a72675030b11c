pub mod media;
pub mod rest;
