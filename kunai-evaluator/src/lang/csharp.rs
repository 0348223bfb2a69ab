use super::*;

pub struct CSharp {
    pub mcs: PathBuf,
    pub mono: PathBuf,
}

fn mono_cmd(bin: &Path, memory: u64) -> OsCmd {
    let mut cmd = base_cmd(bin);
    cmd.add_env("MONO_GC_PARAMS", format!("max-heap-size={}m", memory));
    cmd
}

impl Toolchain for CSharp {
    fn language(&self) -> Language {
        Language::MonoCsharp
    }

    fn compile(&self, unit: &CompilationUnit, memory: u64) -> Option<OsCmd> {
        let mut out = std::ffi::OsString::from("-out:");
        out.push(unit.dir.join(format!("{}.exe", unit.entry)));

        // mcs is itself a mono program
        let mut cmd = mono_cmd(&self.mcs, memory);
        cmd.arg(out);
        cmd.arg(unit.entry_path());
        cmd.args(unit.helper_paths());
        Some(cmd)
    }

    fn run(&self, unit: &CompilationUnit, memory: u64) -> OsCmd {
        let mut cmd = mono_cmd(&self.mono, memory);
        cmd.arg(unit.dir.join(format!("{}.exe", unit.entry)));
        cmd
    }

    fn limits_address_space(&self) -> bool {
        false
    }
}
