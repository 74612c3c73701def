use std::path::Path;

use crate::config::Config;

pub fn check(cfg: &Config, data_dir: &Path) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    // Check 1: data dir writable
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        errors.push(format!("cannot create {}: {e}", data_dir.display()));
    } else {
        let marker = data_dir.join(".write-test");
        match std::fs::write(&marker, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&marker);
            }
            Err(e) => errors.push(format!(
                "cannot write to {}: {e}\n  \
                 → pass a writable --data-dir",
                data_dir.display()
            )),
        }
    }

    // Check 2: polling throttle sane
    if cfg.throttle_polling_ms == 0 {
        errors.push(
            "--throttle-polling-ms is 0\n  \
             → the NFC frontend would be polled without pause; use at least 50"
                .to_string(),
        );
    }

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
