use std::path::Path;
use std::sync::Once;

use kunai_sandbox::{Sandbox, SandboxOptions, SandboxOutput};
use kunai_utils::os_cmd::OsCmd;

use anyhow::Result;
use tracing::{debug, error};

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(kunai_utils::tracing::setup_tracing);
}

pub fn sandbox(root: &Path) -> Sandbox {
    init();
    Sandbox::new(root, SandboxOptions::default()).unwrap()
}

pub fn sh(script: &str) -> OsCmd {
    let mut cmd = OsCmd::new("/bin/sh");
    cmd.arg("-c").arg(script).inherit_env("PATH");
    cmd
}

pub fn run(sandbox: &mut Sandbox, cmd: &OsCmd) -> Result<SandboxOutput> {
    debug!("sandbox cmd = {}", cmd);
    match sandbox.run(cmd) {
        Ok(output) => {
            debug!("sandbox output = {:?}", output);
            Ok(output)
        }
        Err(err) => {
            error!("sandbox error:\n{:?}", err);
            Err(err)
        }
    }
}
