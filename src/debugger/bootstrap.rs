//! Session-scoped files and the code which brings up the debug target inside the engine.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Seed of the cell file name hash, reported to the front end in `debugInfo`.
pub const HASH_SEED: u32 = 0xc70f_6907;
/// Hash method name as understood by the front end.
pub const HASH_METHOD: &str = "Murmur2";
pub const TMP_FILE_SUFFIX: &str = ".robot";

const INIT_LOGGER: &str = r#"
import robotframework_ls
robotframework_ls.import_robocorp_ls_core()
from robocorp_ls_core.robotframework_log import configure_logger, _log_config
configure_logger("robot", 3, log_file)
"#;

const INIT_DEBUG_TARGET: &str = r#"
from robotframework_debug_adapter.run_robot__main__ import connect, _RobotTargetComm
s = connect(int(robot_port))
processor = _RobotTargetComm(s, debug=True)
processor.start_communication_threads()
"#;

const INIT_LISTENERS: &str = r#"
from robotframework_debug_adapter.listeners import DebugListener, DebugListenerV2
debug_listener = DebugListener()
debug_listenerv2 = DebugListenerV2()
"#;

/// MurmurHash2, 32 bit variant.
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ data.len() as u32;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            h ^= (tail[1] as u32) << 8;
        }
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Directories of one debug session, namespaced by process id.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPaths {
    pub log_dir: PathBuf,
    pub cell_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(root: &Path, pid: u32) -> Self {
        Self {
            log_dir: root.join(format!("xrobot_debug_logs_{pid}")),
            cell_dir: root.join(format!("xrobot_{pid}")),
        }
    }

    pub fn for_current_process(root: &Path) -> Self {
        Self::new(root, std::process::id())
    }

    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::create_dir_all(&self.cell_dir)?;
        Ok(())
    }

    /// Log file of the engine side debug target.
    pub fn engine_log(&self) -> PathBuf {
        self.log_dir.join("xrobot.log")
    }

    /// DAP traffic trace.
    pub fn trace_log(&self) -> PathBuf {
        self.log_dir.join("dap.log")
    }

    /// Prefix of cell files, with a trailing separator.
    pub fn tmp_file_prefix(&self) -> String {
        format!("{}{}", self.cell_dir.display(), std::path::MAIN_SEPARATOR)
    }

    /// File name under which a cell with `code` is known to the debug target.
    pub fn cell_file(&self, code: &str) -> PathBuf {
        self.cell_dir.join(format!(
            "{}{TMP_FILE_SUFFIX}",
            murmur2(code.as_bytes(), HASH_SEED)
        ))
    }
}

/// Engine code which connects the robot debug target to `port`.
pub fn bootstrap_code(port: u16, log_file: &Path) -> String {
    let log_file = serde_json::to_string(&log_file.to_string_lossy())
        .unwrap_or_else(|_| "'xrobot.log'".to_string());
    let vars = format!("robot_port = {port}\nlog_file = {log_file}\n");
    [vars.as_str(), INIT_LOGGER, INIT_DEBUG_TARGET, INIT_LISTENERS].concat()
}
