use super::*;

pub struct Python {
    pub python3: PathBuf,
}

impl Toolchain for Python {
    fn language(&self) -> Language {
        Language::CpythonPython3
    }

    fn compile(&self, _: &CompilationUnit, _: u64) -> Option<OsCmd> {
        None
    }

    fn run(&self, unit: &CompilationUnit, _: u64) -> OsCmd {
        let mut cmd = base_cmd(&self.python3);
        cmd.arg(unit.dir.join(unit.main_file()));
        cmd
    }
}
