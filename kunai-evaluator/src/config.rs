use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use ubyte::ByteUnit;
use validator::Validate;

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[validate]
    pub executor: Executor,

    #[validate]
    pub toolchain: Toolchain,

    #[validate]
    pub redis: Redis,

    #[validate]
    pub worker: Worker,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Executor {
    pub workspace_root: PathBuf,

    /// milliseconds, compilation and checking
    #[validate(range(min = 1, max = 600000))]
    pub internal_time_limit: u64,

    /// compilation and checking
    pub internal_memory_limit: ByteUnit,

    /// maximum size of a file written by a sandboxed process
    pub output_limit: ByteUnit,

    /// Private mount namespace and chroot. Plain mode lets submissions read
    /// the host filesystem and must be opted into explicitly.
    pub isolate: bool,

    /// Delegated cgroup v2 directory. When set, memory limits are enforced by
    /// the kernel instead of `RLIMIT_AS` and the peak usage check.
    pub cgroup: Option<PathBuf>,

    pub uid: Option<u32>,

    pub gid: Option<u32>,

    /// mounted read-only in isolated mode
    pub bind_ro: Vec<PathBuf>,

    /// mounted read-write in isolated mode
    pub bind_rw: Vec<PathBuf>,
}

impl Default for Executor {
    fn default() -> Self {
        let paths = |v: &[&str]| v.iter().map(PathBuf::from).collect();
        Self {
            workspace_root: PathBuf::from("/tmp/kunai"),
            internal_time_limit: 10000,
            internal_memory_limit: ByteUnit::Mebibyte(1024),
            output_limit: ByteUnit::Mebibyte(64),
            isolate: true,
            cgroup: None,
            uid: None,
            gid: None,
            bind_ro: paths(&["/bin", "/etc", "/lib", "/lib64", "/usr"]),
            bind_rw: paths(&["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"]),
        }
    }
}

/// Paths of the compilers and interpreters.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub gcc: PathBuf,
    pub gxx: PathBuf,
    pub javac: PathBuf,
    pub java: PathBuf,
    pub python3: PathBuf,
    pub mcs: PathBuf,
    pub mono: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            gcc: "/usr/bin/gcc".into(),
            gxx: "/usr/bin/g++".into(),
            javac: "/usr/bin/javac".into(),
            java: "/usr/bin/java".into(),
            python3: "/usr/bin/python3".into(),
            mcs: "/usr/bin/mcs".into(),
            mono: "/usr/bin/mono".into(),
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Redis {
    #[validate(length(min = 1))]
    pub url: String,

    #[validate(range(min = 1, max = 64))]
    pub max_open: u64,

    #[validate(length(min = 1))]
    pub key_prefix: String,

    /// seconds, BLPOP timeout of the queue listeners
    #[validate(range(min = 1, max = 60))]
    pub block_timeout: u64,
}

impl Default for Redis {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1/".into(),
            max_open: 16,
            key_prefix: "kunai".into(),
            block_timeout: 1,
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Worker {
    /// concurrent testcase executions
    #[validate(range(min = 1, max = 256))]
    pub testcase_workers: usize,

    /// concurrent evaluations in `serve` mode
    #[validate(range(min = 1, max = 256))]
    pub evaluation_workers: usize,
}

impl Default for Worker {
    fn default() -> Self {
        Self {
            testcase_workers: 4,
            evaluation_workers: 2,
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: path = {}", path.display()))?;
        Self::from_toml(&content)
    }
}
