use super::*;

pub struct CCpp {
    pub compiler: PathBuf,
    pub std: CCppStd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CCppStd {
    C11,
    Cpp14,
}

impl CCppStd {
    fn as_flag(self) -> &'static str {
        match self {
            CCppStd::C11 => "-std=c11",
            CCppStd::Cpp14 => "-std=c++14",
        }
    }

    fn is_cpp(self) -> bool {
        matches!(self, CCppStd::Cpp14)
    }
}

impl CCpp {
    pub fn c(gcc: &Path) -> Self {
        Self {
            compiler: gcc.to_owned(),
            std: CCppStd::C11,
        }
    }

    pub fn cpp(gxx: &Path) -> Self {
        Self {
            compiler: gxx.to_owned(),
            std: CCppStd::Cpp14,
        }
    }
}

impl Toolchain for CCpp {
    fn language(&self) -> Language {
        if self.std.is_cpp() {
            Language::GccCxx
        } else {
            Language::GccC
        }
    }

    fn compile(&self, unit: &CompilationUnit, _: u64) -> Option<OsCmd> {
        let mut cmd = base_cmd(&self.compiler);

        cmd.arg("-Wall").arg("-Wextra");
        cmd.arg(self.std.as_flag());
        cmd.arg("-O2");
        cmd.arg("-o").arg(unit.dir.join(format!("{}.bin", unit.entry)));
        cmd.arg(unit.entry_path());
        cmd.args(unit.helper_paths());

        // libm is not linked by default for C
        cmd.arg_if(!self.std.is_cpp(), "-lm");

        Some(cmd)
    }

    fn run(&self, unit: &CompilationUnit, _: u64) -> OsCmd {
        base_cmd(unit.artifact(".bin"))
    }
}
