// Consolidated scenario module for `tests/backends/foundation_urlsession`.
//
// If you add new scenario files into this directory, add a corresponding
// `mod` entry here so the test runner picks them up.

mod support;

mod auth_tests;
mod basic_tests;
mod conversion_tests;
mod invalidation_tests;
mod redirect_tests;
mod timeout_tests;
mod upload_tests;
