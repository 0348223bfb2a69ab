use super::*;

pub struct Java {
    pub javac: PathBuf,
    pub java: PathBuf,
}

/// `-Xms` and `-Xmx` for a heap bounded by `memory` MiB.
fn heap_flags(prefix: &str, memory: u64) -> [String; 2] {
    [
        format!("{}-Xms{}m", prefix, memory.min(64)),
        format!("{}-Xmx{}m", prefix, memory),
    ]
}

impl Toolchain for Java {
    fn language(&self) -> Language {
        Language::JdkJava
    }

    fn compile(&self, unit: &CompilationUnit, memory: u64) -> Option<OsCmd> {
        let mut cmd = base_cmd(&self.javac);
        cmd.args(&heap_flags("-J", memory));
        cmd.arg("-encoding").arg("UTF-8");
        cmd.arg("-d").arg(&unit.dir);
        cmd.arg(unit.entry_path());
        cmd.args(unit.helper_paths());
        Some(cmd)
    }

    fn run(&self, unit: &CompilationUnit, memory: u64) -> OsCmd {
        let main = unit.main_file();
        let class = main.strip_suffix(".java").unwrap_or(main);

        let mut cmd = base_cmd(&self.java);
        cmd.args(&heap_flags("", memory));
        cmd.arg("-cp").arg(&unit.dir);
        cmd.arg(class);
        cmd
    }

    fn limits_address_space(&self) -> bool {
        false
    }
}
