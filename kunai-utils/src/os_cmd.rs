use std::ffi::{CString, NulError, OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

/// A program invocation: binary, arguments and environment entries.
///
/// The binary is `argv[0]`. Environment entries are `KEY=value` strings or
/// bare `KEY`s inherited from the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsCmd {
    pub bin: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<OsString>,
}

/// NUL-terminated form of an [`OsCmd`], ready for `execve`.
#[derive(Debug)]
pub struct CCmd {
    pub bin: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
}

impl OsCmd {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(&mut self, a: impl Into<OsString>) -> &mut Self {
        self.args.push(a.into());
        self
    }

    pub fn arg_if(&mut self, cond: bool, a: impl Into<OsString>) -> &mut Self {
        if cond {
            self.arg(a)
        } else {
            self
        }
    }

    pub fn args<I>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn inherit_env(&mut self, k: impl Into<OsString>) -> &mut Self {
        self.env.push(k.into());
        self
    }

    pub fn add_env(&mut self, k: impl Into<OsString>, v: impl AsRef<OsStr>) -> &mut Self {
        let mut e: OsString = k.into();
        e.push(OsStr::from_bytes(b"="));
        e.push(v.as_ref());
        self.env.push(e);
        self
    }

    /// Resolves inherited variables and converts everything to C strings.
    ///
    /// Inherited variables missing from the current environment are skipped.
    pub fn to_c_cmd(&self) -> Result<CCmd, NulError> {
        let bin = CString::new(self.bin.as_os_str().as_bytes())?;

        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(bin.clone());
        for a in &self.args {
            argv.push(CString::new(a.as_bytes())?);
        }

        let mut envp = Vec::with_capacity(self.env.len());
        for e in &self.env {
            if e.as_bytes().contains(&b'=') {
                envp.push(CString::new(e.as_bytes())?);
            } else if let Some(v) = std::env::var_os(e) {
                let mut kv = e.clone();
                kv.push("=");
                kv.push(v);
                envp.push(CString::new(kv.into_vec())?);
            }
        }

        Ok(CCmd { bin, argv, envp })
    }
}

impl fmt::Display for OsCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bin.display())?;
        for a in &self.args {
            write!(f, " {}", a.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let mut cmd = OsCmd::new("/usr/bin/gcc");
        cmd.arg("-O2")
            .arg_if(false, "-g")
            .arg_if(true, "-Wall")
            .args(vec!["-o", "main.bin"])
            .add_env("LANG", "C");
        assert_eq!(cmd.args, ["-O2", "-Wall", "-o", "main.bin"]);
        assert_eq!(cmd.env, ["LANG=C"]);
        assert_eq!(cmd.to_string(), "/usr/bin/gcc -O2 -Wall -o main.bin");
    }

    #[test]
    fn c_cmd() {
        let mut cmd = OsCmd::new("/bin/echo");
        cmd.arg("hello").add_env("A", "1").inherit_env("KUNAI_SURELY_UNSET_VAR");
        let c = cmd.to_c_cmd().unwrap();
        assert_eq!(c.bin.as_bytes(), b"/bin/echo");
        assert_eq!(c.argv.len(), 2);
        assert_eq!(c.argv[0].as_bytes(), b"/bin/echo");
        assert_eq!(c.argv[1].as_bytes(), b"hello");
        assert_eq!(c.envp.len(), 1);
        assert_eq!(c.envp[0].as_bytes(), b"A=1");
    }

    #[test]
    fn inherit_present_env() {
        let mut cmd = OsCmd::new("/bin/true");
        cmd.inherit_env("PATH");
        let c = cmd.to_c_cmd().unwrap();
        if std::env::var_os("PATH").is_some() {
            assert!(c.envp[0].as_bytes().starts_with(b"PATH="));
        }
    }

    #[test]
    fn nul_is_rejected() {
        let mut cmd = OsCmd::new("/bin/echo");
        cmd.arg("a\0b");
        assert!(cmd.to_c_cmd().is_err());
    }
}
