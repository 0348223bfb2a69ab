pub mod c_cpp;
pub mod csharp;
pub mod java;
pub mod python;

use crate::config::Toolchain as ToolchainPaths;

use kunai_protocol::Language;
use kunai_utils::os_cmd::OsCmd;

use std::path::{Path, PathBuf};

/// Source files compiled together, all in `dir` relative to the sandbox root.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub dir: PathBuf,
    pub entry: String,
    pub helpers: Vec<String>,
}

impl CompilationUnit {
    pub fn new(dir: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            entry: entry.into(),
            helpers: Vec::new(),
        }
    }

    pub fn helper(mut self, name: impl Into<String>) -> Self {
        self.helpers.push(name.into());
        self
    }

    pub fn entry_path(&self) -> PathBuf {
        self.dir.join(&self.entry)
    }

    pub fn helper_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.helpers.iter().map(move |h| self.dir.join(h))
    }

    /// The file holding the program's starting point: the first helper
    /// (a grader) if any, otherwise the entry.
    pub fn main_file(&self) -> &str {
        self.helpers.first().unwrap_or(&self.entry)
    }

    /// `./<dir>/<entry><suffix>`
    fn artifact(&self, suffix: &str) -> PathBuf {
        Path::new(".").join(&self.dir).join(format!("{}{}", self.entry, suffix))
    }
}

pub trait Toolchain: Send + Sync {
    fn language(&self) -> Language;

    /// `None` if the language needs no compilation. `memory` is the limit in MiB.
    fn compile(&self, unit: &CompilationUnit, memory: u64) -> Option<OsCmd>;

    fn run(&self, unit: &CompilationUnit, memory: u64) -> OsCmd;

    /// Whether `RLIMIT_AS` may stand in for the memory limit. Runtimes that
    /// reserve large virtual regions at startup cannot run under it.
    fn limits_address_space(&self) -> bool {
        true
    }
}

pub fn toolchain(lang: Language, paths: &ToolchainPaths) -> Box<dyn Toolchain> {
    match lang {
        Language::GccC => Box::new(c_cpp::CCpp::c(&paths.gcc)),
        Language::GccCxx => Box::new(c_cpp::CCpp::cpp(&paths.gxx)),
        Language::JdkJava => Box::new(java::Java {
            javac: paths.javac.clone(),
            java: paths.java.clone(),
        }),
        Language::CpythonPython3 => Box::new(python::Python {
            python3: paths.python3.clone(),
        }),
        Language::MonoCsharp => Box::new(csharp::CSharp {
            mcs: paths.mcs.clone(),
            mono: paths.mono.clone(),
        }),
    }
}

fn base_cmd(bin: impl Into<PathBuf>) -> OsCmd {
    let mut cmd = OsCmd::new(bin);
    cmd.inherit_env("PATH").add_env("LANG", "C.UTF-8");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &OsCmd) -> Vec<String> {
        cmd.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn unit() -> CompilationUnit {
        CompilationUnit::new("sol", "solution.cpp").helper("grader.cpp")
    }

    #[test]
    fn gcc_cxx() {
        let tc = toolchain(Language::GccCxx, &ToolchainPaths::default());
        assert_eq!(tc.language(), Language::GccCxx);

        let cmd = tc.compile(&unit(), 1024).unwrap();
        assert_eq!(cmd.bin, PathBuf::from("/usr/bin/g++"));
        assert_eq!(
            args(&cmd),
            [
                "-Wall",
                "-Wextra",
                "-std=c++14",
                "-O2",
                "-o",
                "sol/solution.cpp.bin",
                "sol/solution.cpp",
                "sol/grader.cpp",
            ]
        );

        let cmd = tc.run(&unit(), 256);
        assert_eq!(cmd.bin, PathBuf::from("./sol/solution.cpp.bin"));
        assert!(cmd.args.is_empty());
        assert!(tc.limits_address_space());
    }

    #[test]
    fn gcc_c() {
        let tc = toolchain(Language::GccC, &ToolchainPaths::default());
        let cmd = tc.compile(&CompilationUnit::new("chk", "checker.c"), 1024).unwrap();
        assert_eq!(cmd.bin, PathBuf::from("/usr/bin/gcc"));
        assert_eq!(
            args(&cmd),
            [
                "-Wall",
                "-Wextra",
                "-std=c11",
                "-O2",
                "-o",
                "chk/checker.c.bin",
                "chk/checker.c",
                "-lm",
            ]
        );
    }

    #[test]
    fn java_main_class() {
        let tc = toolchain(Language::JdkJava, &ToolchainPaths::default());
        assert!(!tc.limits_address_space());

        let unit = CompilationUnit::new("sol", "Solution.java");
        let cmd = tc.compile(&unit, 1024).unwrap();
        assert_eq!(
            args(&cmd),
            [
                "-J-Xms64m",
                "-J-Xmx1024m",
                "-encoding",
                "UTF-8",
                "-d",
                "sol",
                "sol/Solution.java"
            ]
        );
        let cmd = tc.run(&unit, 256);
        assert_eq!(cmd.bin, PathBuf::from("/usr/bin/java"));
        assert_eq!(args(&cmd), ["-Xms64m", "-Xmx256m", "-cp", "sol", "Solution"]);

        let unit = unit.helper("Grader.java");
        let cmd = tc.run(&unit, 32);
        assert_eq!(args(&cmd), ["-Xms32m", "-Xmx32m", "-cp", "sol", "Grader"]);
    }

    #[test]
    fn python_runs_grader() {
        let tc = toolchain(Language::CpythonPython3, &ToolchainPaths::default());
        let unit = CompilationUnit::new("sol", "solution.py");
        assert!(tc.compile(&unit, 1024).is_none());
        assert_eq!(args(&tc.run(&unit, 256)), ["sol/solution.py"]);

        let unit = unit.helper("grader.py");
        assert_eq!(args(&tc.run(&unit, 256)), ["sol/grader.py"]);
    }

    #[test]
    fn csharp() {
        let tc = toolchain(Language::MonoCsharp, &ToolchainPaths::default());
        assert!(!tc.limits_address_space());

        let unit = CompilationUnit::new("sol", "Solution.cs");
        let cmd = tc.compile(&unit, 1024).unwrap();
        assert_eq!(cmd.bin, PathBuf::from("/usr/bin/mcs"));
        assert_eq!(args(&cmd), ["-out:sol/Solution.cs.exe", "sol/Solution.cs"]);
        assert!(cmd.env.iter().any(|e| e == "MONO_GC_PARAMS=max-heap-size=1024m"));

        let cmd = tc.run(&unit, 256);
        assert_eq!(cmd.bin, PathBuf::from("/usr/bin/mono"));
        assert_eq!(args(&cmd), ["sol/Solution.cs.exe"]);
        assert!(cmd.env.iter().any(|e| e == "MONO_GC_PARAMS=max-heap-size=256m"));
    }

    #[test]
    fn commands_inherit_path() {
        let tc = toolchain(Language::CpythonPython3, &ToolchainPaths::default());
        let cmd = tc.run(&CompilationUnit::new("sol", "a.py"), 256);
        assert!(cmd.env.iter().any(|e| e == "PATH"));
    }
}
