//! Cross-crate integration tests for ftumix

#[cfg(test)]
mod mixer_integration;
