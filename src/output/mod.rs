//! Suite reporting: JUnit XML for CI and a console summary

pub mod junit;
pub mod text;
