//! Last-scheduled-core lookup via `/proc/<tid>/stat`.

use std::fs;

use nix::unistd::Pid;

use crate::domain::{CoreId, TraceError};

/// 1-based position of the "processor" field (last CPU the task ran on).
const PROC_STAT_CORE_FIELD: usize = 39;

/// Core the thread last ran on, per the kernel.
///
/// Only meaningful while the thread is stopped; on a running thread the
/// answer is stale before it returns.
pub fn core_of(tid: Pid) -> Result<CoreId, TraceError> {
    let path = format!("/proc/{tid}/stat");
    let contents = fs::read_to_string(path)
        .map_err(|source| TraceError::ProcStatUnreadable { tid, source })?;
    parse_core_field(&contents).ok_or(TraceError::ProcStatMalformed { tid })
}

fn parse_core_field(stat: &str) -> Option<CoreId> {
    // comm may contain spaces and parens, so fields are only reliable
    // after the last ')'. The state field right after it is field 3.
    let (_, after_comm) = stat.rsplit_once(')')?;
    after_comm
        .split_whitespace()
        .nth(PROC_STAT_CORE_FIELD - 3)
        .and_then(|field| field.parse().ok())
        .map(CoreId)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_line(comm: &str, core: usize) -> String {
        // Fields 3..=52 after the comm; field 39 is the core.
        let fields: Vec<String> =
            (3..=52).map(|i| if i == 39 { core.to_string() } else { i.to_string() }).collect();
        format!("1234 ({comm}) {}", fields.join(" "))
    }

    #[test]
    fn test_parses_processor_field() {
        assert_eq!(parse_core_field(&stat_line("target", 2)), Some(CoreId(2)));
        assert_eq!(parse_core_field(&stat_line("target", 0)), Some(CoreId(0)));
    }

    #[test]
    fn test_comm_with_spaces_and_parens() {
        // Thread names like "tokio-runtime-w" are tame; names with spaces
        // and a ')' are legal and must not shift the fields.
        assert_eq!(parse_core_field(&stat_line("evil) name (x", 7)), Some(CoreId(7)));
    }

    #[test]
    fn test_truncated_line_is_malformed() {
        assert_eq!(parse_core_field("1234 (short) R 1 2"), None);
        assert_eq!(parse_core_field(""), None);
    }
}
