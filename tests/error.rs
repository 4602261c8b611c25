use hookdeploy::error::DeployError;

#[test]
fn display_configuration() {
    let err = DeployError::Configuration("user".into());
    assert_eq!(err.to_string(), "Please configure user");
}

#[test]
fn display_connection() {
    let err = DeployError::Connection {
        host: "example.org".into(),
        reason: "Permission denied (publickey)".into(),
    };
    assert_eq!(
        err.to_string(),
        "connection to example.org failed: Permission denied (publickey)"
    );
}

#[test]
fn display_remote_command() {
    let err = DeployError::RemoteCommand {
        command: "svc -du /home/alice/service/demo".into(),
        exit_code: 111,
        output: "unable to control".into(),
    };
    assert_eq!(
        err.to_string(),
        "remote command failed (exit 111): svc -du /home/alice/service/demo"
    );
}

#[test]
fn display_upload() {
    let err = DeployError::Upload {
        path: "/home/alice/etc/run-demo/run".into(),
        reason: "No space left on device".into(),
    };
    assert_eq!(
        err.to_string(),
        "upload to /home/alice/etc/run-demo/run failed: No space left on device"
    );
}

#[test]
fn display_unknown_task() {
    let err = DeployError::UnknownTask("deploy:migrate".into());
    assert_eq!(err.to_string(), "unknown task: deploy:migrate");
}

#[test]
fn display_command_not_found() {
    let err = DeployError::CommandNotFound("ssh".into());
    assert_eq!(err.to_string(), "command not found: ssh");
}

#[test]
fn display_other() {
    let err = DeployError::Other("custom error".into());
    assert_eq!(err.to_string(), "custom error");
}

#[test]
fn task_failed_names_task_and_command() {
    let err = DeployError::TaskFailed {
        task: "deploy:fix_permissions".into(),
        source: Box::new(DeployError::RemoteCommand {
            command: "chmod 755 /srv".into(),
            exit_code: 1,
            output: String::new(),
        }),
    };

    assert_eq!(
        err.to_string(),
        "task 'deploy:fix_permissions' failed: remote command failed (exit 1): chmod 755 /srv"
    );
    assert_eq!(err.failed_task(), Some("deploy:fix_permissions"));
    assert!(matches!(err.root(), DeployError::RemoteCommand { .. }));
}

#[test]
fn from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let err: DeployError = io_err.into();
    assert!(matches!(err, DeployError::Io(_)));
}

#[test]
fn from_json_error() {
    let json_err = serde_json::from_str::<Vec<u64>>("invalid").unwrap_err();
    let err: DeployError = json_err.into();
    assert!(matches!(err, DeployError::Json(_)));
}
