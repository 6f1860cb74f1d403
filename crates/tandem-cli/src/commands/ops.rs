//! Ops - List Supported Collectives
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::Serialize;
use tandem_harness::CollectiveKind;

use super::utils::{print_header, print_kv};
use crate::cli::OpsArgs;
use crate::error::CliResult;

#[derive(Debug, Serialize)]
struct OpInfo {
    name: &'static str,
    raw_backend_path: bool,
    eager_returns_gradient: bool,
}

fn op_infos() -> Vec<OpInfo> {
    CollectiveKind::ALL
        .iter()
        .map(|op| OpInfo {
            name: op.name(),
            raw_backend_path: op.supports_backend_path(),
            eager_returns_gradient: op.is_expert_routing(),
        })
        .collect()
}

/// Execute the ops command
pub fn execute(args: OpsArgs) -> CliResult<()> {
    let infos = op_infos();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    print_header("Collectives");
    for info in &infos {
        let paths = if info.raw_backend_path { "0, 1" } else { "0" };
        print_kv(info.name, &format!("path_id {}", paths));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_infos() {
        let infos = op_infos();
        assert_eq!(infos.len(), 12);
        let sendrecv = infos.iter().find(|i| i.name == "sendrecv").unwrap();
        assert!(sendrecv.raw_backend_path);
        let gather = infos.iter().find(|i| i.name == "global_gather").unwrap();
        assert!(!gather.raw_backend_path);
        assert!(gather.eager_returns_gradient);
    }
}
