// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

//! Run the whole balance pipeline against fake accounting commands.

#![cfg(unix)]

extern crate slurm_acct;
extern crate tempfile;

use slurm_acct::balance::compute_balances;
use slurm_acct::errors::ExitCode;
use slurm_acct::{AcctError, Allocation, BalanceOptions, SlurmCommands, UsageQuery};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const SACCTMGR: &str = r#"#!/bin/sh
case "$*" in
  *"show qos"*)
    cat <<'EOF'
normal|billing=1000|NoDecay|Normal allocation
debug|cpu=60|DenyOnLimit|Debugging
EOF
    ;;
  *"show assoc"*)
    cat <<'EOF'
proj1|||
proj1|alice|normal|normal
proj1|bob|normal,debug|normal
proj2|carol|normal|normal
EOF
    ;;
  *)
    echo "unexpected arguments: $*" >&2
    exit 2
    ;;
esac
"#;

// Only answers when asked for exactly the budget-bearing QoS.
const SACCT: &str = r#"#!/bin/sh
case "$*" in
  *"--state=CD,F,TO --starttime=2019-01-01 -q normal")
    cat <<'EOF'
1|alice|proj1|normal|COMPLETED|billing=10,cpu=1|600|compute
2|bob|proj1|normal|COMPLETED|billing=20,cpu=2,mem=4000M|1200|compute
3|bob|proj1|normal|CANCELLED by 0||0|compute
EOF
    ;;
  *)
    echo "unexpected arguments: $*" >&2
    exit 3
    ;;
esac
"#;

const BROKEN: &str = "#!/bin/sh\necho 'database unavailable' >&2\nexit 1\n";

fn script(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// One test, so that no other test thread forks while a script is still open
// for writing (which makes exec fail with ETXTBSY).
#[test]
fn fake_commands() {
    let dir = tempfile::tempdir().unwrap();

    let cmds = SlurmCommands {
        sacct: script(dir.path(), "sacct", SACCT).into(),
        sacctmgr: script(dir.path(), "sacctmgr", SACCTMGR).into(),
    };

    let broken = SlurmCommands {
        sacct: script(dir.path(), "broken-sacct", BROKEN).into(),
        sacctmgr: script(dir.path(), "broken-sacctmgr", BROKEN).into(),
    };

    // Full pipeline for two users.

    let users: HashSet<String> = vec!["alice".to_owned(), "bob".to_owned()].into_iter().collect();
    let catalog = cmds.load_catalog().unwrap();
    let assocs = cmds.load_associations(&catalog, Some(&users)).unwrap();
    assert_eq!(assocs.len(), 2);

    let query = UsageQuery::default().for_associations(&assocs);
    assert_eq!(query.qos, vec!["normal"]);

    let usage = cmds.load_usage(&query, true).unwrap();
    let rows = compute_balances(&assocs, &usage, &BalanceOptions::default());
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].account, "proj1");
    assert_eq!(rows[0].qos, "normal");
    assert_eq!(rows[0].allocation, Allocation::Bounded(1000.));
    assert_eq!(rows[0].used, Some(500.));
    assert_eq!(rows[0].remaining, Some(500.));
    assert_eq!(rows[0].remaining_percent, Some(50.));

    assert_eq!(rows[1].qos, "debug");
    assert_eq!(rows[1].allocation, Allocation::Unlimited);
    assert_eq!(rows[1].used, None);

    let per_user = BalanceOptions { per_user: true, ..Default::default() };
    let rows = compute_balances(&assocs, &usage, &per_user);
    let proj1: Vec<_> = rows.iter()
        .filter(|r| r.qos == "normal")
        .map(|r| (r.user.clone().unwrap(), r.used.unwrap()))
        .collect();
    assert_eq!(proj1, vec![("alice".to_owned(), 100.), ("bob".to_owned(), 400.)]);

    // A differently-scoped query is refused by the fake sacct.

    let everyone = cmds.load_associations(&catalog, None).unwrap();
    assert_eq!(everyone.len(), 3);
    let query = UsageQuery::default().for_associations(&everyone);
    assert!(cmds.load_usage(&query, false).is_ok());

    let query = UsageQuery { qos: vec!["debug".to_owned()], ..Default::default() };
    let err = cmds.load_usage(&query, false).unwrap_err();
    match err.downcast_ref::<AcctError>() {
        Some(&AcctError::CommandFailed { code, ref stderr, .. }) => {
            assert_eq!(code, ExitCode::Code(3));
            assert!(stderr.starts_with("unexpected arguments"));
        },
        other => panic!("unexpected error: {:?}", other),
    }

    // Failing commands are fatal.

    let err = broken.load_catalog().unwrap_err();
    match err.downcast_ref::<AcctError>() {
        Some(&AcctError::CommandFailed { code, ref stderr, ref command }) => {
            assert_eq!(code, ExitCode::Code(1));
            assert_eq!(stderr, "database unavailable");
            assert!(command.contains("show qos"));
        },
        other => panic!("unexpected error: {:?}", other),
    }
}
