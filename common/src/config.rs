// Harness configuration keys
// Both limits are required, there is no default value for them: the sum of
// the two must stay below the no output timeout of the continuous
// integration, which only the project configuration knows about.
pub const KEY_TIMEOUT_LIMIT_SETUP_AND_CALL: &str = "timeout_limit_for_setup_and_call";
pub const KEY_TIMEOUT_LIMIT_TEARDOWN: &str = "timeout_limit_teardown";

// The only named field accepted by the per test timeout marker
pub const MARKER_TIMEOUT_FIELD: &str = "timeout";

// Environment overrides, read once per process
//   - TOS_TIMEOUT_LIMIT_SETUP_AND_CALL / TOS_TIMEOUT_LIMIT_TEARDOWN
//       seconds, an empty value is the same as unset
//   - TOS_SUPERVISOR_POST_MORTEM
//       "1" | "true"  => open a post-mortem session on unhandled unit faults
//   - TOS_SUPERVISOR_WORKER
//       set by distributed runners, disables the FLAKY feedback
pub const ENV_TIMEOUT_LIMIT_SETUP_AND_CALL: &str = "TOS_TIMEOUT_LIMIT_SETUP_AND_CALL";
pub const ENV_TIMEOUT_LIMIT_TEARDOWN: &str = "TOS_TIMEOUT_LIMIT_TEARDOWN";
pub const ENV_POST_MORTEM: &str = "TOS_SUPERVISOR_POST_MORTEM";
pub const ENV_WORKER: &str = "TOS_SUPERVISOR_WORKER";

// Supported blockchain clients
// Any version at or above the lowest one is accepted, the highest version is
// only the most recent release the suite was run against and is reported in
// error messages.
pub const LOWEST_SUPPORTED_GETH_VERSION: &str = "1.7.2";
pub const HIGHEST_SUPPORTED_GETH_VERSION: &str = "1.10.26";
pub const LOWEST_SUPPORTED_PARITY_VERSION: &str = "1.7.6";
pub const HIGHEST_SUPPORTED_PARITY_VERSION: &str = "3.3.5";
