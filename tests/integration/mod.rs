//! Integration Tests Module
//!
//! End-to-end workflow runs against shell-script tool stand-ins: success,
//! group isolation, insufficient data, chunk timeout and resume.

// Full workflow runs
mod workflow_test;
