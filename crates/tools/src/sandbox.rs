//! Environment scrubbing for tool subprocesses.
//!
//! Loader hooks and interpreter startup knobs let a child process hijack
//! every later execution, so they never reach tool subprocesses.

const BLOCKED_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "PYTHONSTARTUP",
    "PYTHONPATH",
    "PYTHONHOME",
    "NODE_OPTIONS",
    "NODE_PATH",
    "RUBYLIB",
    "RUBYOPT",
    "PERL5LIB",
    "PERL5OPT",
    "BASH_ENV",
    "ENV",
    "CDPATH",
    "IFS",
];

/// True when the variable must not be forwarded to tool subprocesses.
pub fn is_blocked_env_var(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    BLOCKED_ENV_VARS.contains(&upper.as_str())
}

/// Remove blocked variables from a command's inherited environment.
pub fn scrub_command(cmd: &mut tokio::process::Command) {
    for var in BLOCKED_ENV_VARS {
        cmd.env_remove(var);
    }
}
