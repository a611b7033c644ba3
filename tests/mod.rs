mod lifecycle_tests;
mod support;
