use hookdeploy::error::{DeployError, DeployResult};
use hookdeploy::{ConfigStore, DryRunSession, TaskContext, TaskGraph};

/// A task that leaves a trace in the session's command log.
fn echo(name: &'static str) -> impl Fn(&mut TaskContext<'_>) -> DeployResult<()> + Send + Sync + 'static {
    move |ctx| {
        ctx.run(&format!("echo {name}"))?;
        Ok(())
    }
}

fn run(graph: &TaskGraph, target: &str) -> (DeployResult<Vec<String>>, Vec<String>) {
    let config = ConfigStore::new();
    let mut session = DryRunSession::new("example.org");
    let result = {
        let mut ctx = TaskContext::new(&config, &mut session);
        graph.run(target, &mut ctx)
    };
    let commands = session.commands().iter().map(|c| (*c).to_string()).collect();
    (result, commands)
}

#[test]
fn before_hooks_then_task_then_after_hooks() {
    let mut graph = TaskGraph::new();
    graph
        .task("task", "", echo("task"))
        .task("before1", "", echo("before1"))
        .task("before2", "", echo("before2"))
        .task("after1", "", echo("after1"))
        .before("task", "before1")
        .after("task", "after1")
        .before("task", "before2");

    assert_eq!(
        graph.plan("task").unwrap(),
        vec!["before1", "before2", "task", "after1"]
    );

    let (result, commands) = run(&graph, "task");
    assert_eq!(result.unwrap(), vec!["before1", "before2", "task", "after1"]);
    assert_eq!(
        commands,
        vec!["echo before1", "echo before2", "echo task", "echo after1"]
    );
}

#[test]
fn hooks_on_hooks_expand_recursively() {
    let mut graph = TaskGraph::new();
    graph
        .task("setup", "", echo("setup"))
        .task("runtime", "", echo("runtime"))
        .task("manager", "", echo("manager"))
        .task("daemon", "", echo("daemon"))
        .task("logs", "", echo("logs"))
        .before("setup", "runtime")
        .before("runtime", "manager")
        .after("setup", "daemon")
        .after("daemon", "logs");

    assert_eq!(
        graph.plan("setup").unwrap(),
        vec!["manager", "runtime", "setup", "daemon", "logs"]
    );
}

#[test]
fn task_reachable_twice_runs_once() {
    let mut graph = TaskGraph::new();
    graph
        .task("deploy", "", echo("deploy"))
        .task("symlink", "", echo("symlink"))
        .task("permissions", "", echo("permissions"))
        .before("deploy", "symlink")
        .before("deploy", "permissions")
        .after("symlink", "permissions");

    let (result, commands) = run(&graph, "deploy");

    assert_eq!(result.unwrap(), vec!["symlink", "permissions", "deploy"]);
    assert_eq!(
        commands
            .iter()
            .filter(|c| c.as_str() == "echo permissions")
            .count(),
        1
    );
}

#[test]
fn hook_cycles_terminate() {
    let mut graph = TaskGraph::new();
    graph
        .task("a", "", echo("a"))
        .task("b", "", echo("b"))
        .after("a", "b")
        .after("b", "a");

    assert_eq!(graph.plan("a").unwrap(), vec!["a", "b"]);
}

#[test]
fn hooks_on_missing_anchor_are_ignored() {
    let mut graph = TaskGraph::new();
    graph
        .task("deploy", "", echo("deploy"))
        .task("extra", "", echo("extra"))
        .after("deploy:migrations", "extra");

    assert_eq!(graph.plan("deploy").unwrap(), vec!["deploy"]);
}

#[test]
fn hook_to_missing_task_fails_before_anything_runs() {
    let mut graph = TaskGraph::new();
    graph
        .task("deploy", "", echo("deploy"))
        .before("deploy", "does:not_exist");

    let (result, commands) = run(&graph, "deploy");

    assert!(matches!(result, Err(DeployError::UnknownTask(ref t)) if t == "does:not_exist"));
    assert!(commands.is_empty());
}

#[test]
fn first_failure_stops_the_run() {
    let mut graph = TaskGraph::new();
    graph
        .task("first", "", echo("first"))
        .task("broken", "", |_| Err(DeployError::Other("disk full".into())))
        .task("never", "", echo("never"))
        .task("target", "", echo("target"))
        .before("target", "first")
        .before("target", "broken")
        .before("target", "never");

    let (result, commands) = run(&graph, "target");

    let err = result.unwrap_err();
    assert_eq!(err.failed_task(), Some("broken"));
    assert_eq!(err.to_string(), "task 'broken' failed: disk full");
    assert_eq!(commands, vec!["echo first"]);
}

#[test]
fn tasks_listed_in_registration_order() {
    let mut graph = TaskGraph::new();
    graph
        .task("b", "second", echo("b"))
        .task("a", "first", echo("a"));

    let names: Vec<&str> = graph.tasks().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
}
