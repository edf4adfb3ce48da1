use std::time::Duration;

use ideals_config::DiagnosticsConfig;
use ideals_core::{LspPath, Position, Range};
use ideals_lsp::SessionState;
use lsp_types::{DiagnosticSeverity, WorkDoneProgress};
use pretty_assertions::assert_eq;

use crate::support::{self, ClientEvent, Harness, Mode, ScriptedEngine, TestFix};

const URI: &str = "file:///ws/A.txt";
const QUIET: Duration = Duration::from_millis(300);

fn everything() -> Range {
    Range::new(Position::new(0, 0), Position::new(10, 0))
}

#[test]
fn one_launch_publishes_once_with_document_version() {
    let engine = ScriptedEngine::new(Mode::Findings);
    engine.set_findings(vec![support::finding(0, 5, "bad start")]);
    let harness = Harness::new(engine.clone());
    let path = harness.open(URI, "hello world");

    let generation = harness.service.launch_diagnostics(&path).expect("launched");
    assert_eq!(harness.service.generation(&path), Some(generation));

    let (uri, diagnostics, version) = harness.client.expect_publish();
    assert_eq!(uri.as_str(), URI);
    assert_eq!(version, Some(1));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, "bad start");
    assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
    assert_eq!(diagnostics[0].source.as_deref(), Some("ideals"));

    assert!(support::wait_until(|| {
        harness.service.session_state(&path) == Some(SessionState::Completed)
    }));
    harness.client.expect_no_publish(QUIET);
    assert_eq!(engine.calls(), 1);
}

#[test]
fn back_to_back_launches_run_a_single_pass() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::with_config(engine.clone(), support::diagnostics_config(100));
    let path = harness.open(URI, "text");

    let first = harness.service.launch_diagnostics(&path).expect("first");
    let second = harness.service.launch_diagnostics(&path).expect("second");
    assert!(second > first);
    assert_eq!(harness.service.generation(&path), Some(second));

    harness.client.expect_publish();
    harness.client.expect_no_publish(QUIET);
    assert_eq!(engine.calls(), 1);
}

#[test]
fn sessions_are_kept_per_resource() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::new(engine.clone());
    let a = harness.open("file:///ws/A.txt", "a");
    let b = harness.open("file:///ws/B.txt", "b");

    let ga = harness.service.launch_diagnostics(&a).expect("a");
    let gb = harness.service.launch_diagnostics(&b).expect("b");
    assert_ne!(ga, gb);

    let mut uris = vec![
        harness.client.expect_publish().0.as_str().to_string(),
        harness.client.expect_publish().0.as_str().to_string(),
    ];
    uris.sort();
    assert_eq!(uris, vec!["file:///ws/A.txt", "file:///ws/B.txt"]);
    assert_eq!(harness.service.generation(&a), Some(ga));
    assert_eq!(harness.service.generation(&b), Some(gb));
}

#[test]
fn quick_fixes_come_from_the_current_session_only() {
    let engine = ScriptedEngine::new(Mode::Findings);
    engine.set_findings(vec![
        support::finding(0, 5, "fixable").with_fix(TestFix::new("Fix it")),
        support::finding(6, 11, "plain"),
    ]);
    let harness = Harness::new(engine.clone());
    let path = harness.open(URI, "hello world");

    harness.service.launch_diagnostics(&path);
    let (_, diagnostics, _) = harness.client.expect_publish();
    // A finding with fixes is still reported as a diagnostic.
    assert_eq!(diagnostics.len(), 2);

    let fixes = harness.service.get_quick_fixes(&path, &everything());
    let titles: Vec<_> = fixes.iter().map(|fix| fix.title().to_string()).collect();
    assert_eq!(titles, vec!["Fix it"]);

    let elsewhere = Range::new(Position::new(0, 7), Position::new(0, 8));
    assert!(harness.service.get_quick_fixes(&path, &elsewhere).is_empty());

    // Superseding the session hides its fixes immediately, before the new pass runs.
    harness.service.set_config(support::diagnostics_config(60_000));
    harness.service.launch_diagnostics(&path);
    assert!(harness.service.get_quick_fixes(&path, &everything()).is_empty());
}

#[test]
fn quick_fixes_for_unknown_resources_are_empty() {
    let harness = Harness::new(ScriptedEngine::new(Mode::Findings));
    let path = LspPath::from_lsp_uri("file:///ws/Unknown.txt").unwrap();
    assert!(harness.service.get_quick_fixes(&path, &everything()).is_empty());
}

#[test]
fn findings_without_message_are_not_published() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let mut silent = support::finding(0, 1, "ignored").with_fix(TestFix::new("Hidden"));
    silent.message = None;
    engine.set_findings(vec![silent, support::finding(1, 2, "shown")]);
    let harness = Harness::new(engine);
    let path = harness.open(URI, "abc");

    harness.service.launch_diagnostics(&path);
    let (_, diagnostics, _) = harness.client.expect_publish();
    let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(messages, vec!["shown"]);
    assert!(harness.service.get_quick_fixes(&path, &everything()).is_empty());
}

#[test]
fn superseding_a_running_pass_restarts_the_engine_and_drops_its_results() {
    let engine = ScriptedEngine::new(Mode::Block);
    let harness = Harness::new(engine.clone());
    let path = harness.open(URI, "v1");

    let first = harness.service.launch_diagnostics(&path).expect("first");
    engine.wait_started(1);
    assert_eq!(harness.service.session_state(&path), Some(SessionState::Running));

    engine.set_mode(Mode::Findings);
    engine.set_findings(vec![support::finding(0, 2, "fresh")]);
    harness.workspace.open(path.clone(), "v2", 2);
    let second = harness.service.launch_diagnostics(&path).expect("second");
    assert!(second > first);
    assert_eq!(engine.restarts(), vec![path.clone()]);

    // The stale pass does not relaunch; only the new session publishes.
    let (_, diagnostics, version) = harness.client.expect_publish();
    assert_eq!(version, Some(2));
    assert_eq!(diagnostics[0].message, "fresh");
    harness.client.expect_no_publish(QUIET);
    assert_eq!(harness.service.generation(&path), Some(second));
    assert_eq!(engine.calls(), 2);
}

#[test]
fn halting_a_running_pass_publishes_nothing() {
    let engine = ScriptedEngine::new(Mode::Block);
    let harness = Harness::new(engine.clone());
    let path = harness.open(URI, "text");

    harness.service.launch_diagnostics(&path);
    engine.wait_started(1);
    harness.service.halt_diagnostics(&path);

    assert_eq!(harness.service.session_state(&path), None);
    assert_eq!(engine.restarts(), vec![path.clone()]);
    harness.client.expect_no_publish(QUIET);
    assert_eq!(engine.calls(), 1);
}

#[test]
fn halting_a_scheduled_session_skips_the_pass_without_restarting_the_engine() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::with_config(engine.clone(), support::diagnostics_config(200));
    let path = harness.open(URI, "text");

    harness.service.launch_diagnostics(&path);
    assert_eq!(harness.service.session_state(&path), Some(SessionState::Scheduled));
    harness.service.halt_diagnostics(&path);
    harness.service.halt_diagnostics(&path);

    harness.client.expect_no_publish(Duration::from_millis(500));
    assert_eq!(engine.calls(), 0);
    assert!(engine.restarts().is_empty());
}

#[test]
fn engine_cancellation_of_the_current_session_relaunches_it() {
    let engine = ScriptedEngine::new(Mode::CancelOnce);
    engine.set_findings(vec![support::finding(0, 1, "after restart")]);
    let harness = Harness::new(engine.clone());
    let path = harness.open(URI, "text");

    let first = harness.service.launch_diagnostics(&path).expect("launched");
    let (_, diagnostics, _) = harness.client.expect_publish();
    assert_eq!(diagnostics[0].message, "after restart");
    assert_eq!(engine.calls(), 2);

    let current = harness.service.generation(&path).expect("session");
    assert!(current > first);
    assert!(support::wait_until(|| {
        harness.service.session_state(&path) == Some(SessionState::Completed)
    }));
}

#[test]
fn zero_debounce_passes_see_their_own_session_as_current() {
    for _ in 0..20 {
        let engine = ScriptedEngine::new(Mode::CancelOnce);
        engine.set_findings(vec![support::finding(0, 1, "relaunched")]);
        let harness = Harness::with_config(engine.clone(), support::diagnostics_config(0));
        let path = harness.open(URI, "text");

        harness.service.launch_diagnostics(&path);
        let (_, diagnostics, _) = harness.client.expect_publish();
        assert_eq!(diagnostics[0].message, "relaunched");
        assert_eq!(engine.calls(), 2);
    }
}

#[test]
fn restarts_are_bounded() {
    let engine = ScriptedEngine::new(Mode::CancelAlways);
    let config = DiagnosticsConfig {
        debounce_ms: 5,
        max_restarts: 2,
        ..DiagnosticsConfig::default()
    };
    let harness = Harness::with_config(engine.clone(), config);
    let path = harness.open(URI, "text");

    harness.service.launch_diagnostics(&path);
    assert!(support::wait_until(|| {
        harness.service.session_state(&path) == Some(SessionState::Failed)
    }));
    assert_eq!(engine.calls(), 3);
    harness.client.expect_no_publish(QUIET);
    assert_eq!(engine.calls(), 3);
}

#[test]
fn engine_not_ready_publishes_an_empty_list() {
    let engine = ScriptedEngine::new(Mode::NotReady);
    let harness = Harness::new(engine);
    let path = harness.open(URI, "text");

    harness.service.launch_diagnostics(&path);
    let (_, diagnostics, _) = harness.client.expect_publish();
    assert!(diagnostics.is_empty());
}

#[test]
fn failing_or_panicking_engines_publish_nothing() {
    for mode in [Mode::Fail, Mode::Panic] {
        let engine = ScriptedEngine::new(mode);
        let harness = Harness::new(engine);
        let path = harness.open(URI, "text");

        harness.service.launch_diagnostics(&path);
        assert!(
            support::wait_until(|| {
                harness.service.session_state(&path) == Some(SessionState::Failed)
            }),
            "{mode:?}"
        );
        harness.client.expect_no_publish(QUIET);
    }
}

#[test]
fn model_lock_is_released_after_a_panicking_pass() {
    let engine = ScriptedEngine::new(Mode::Panic);
    let harness = Harness::new(engine.clone());
    let path = harness.open(URI, "text");

    harness.service.launch_diagnostics(&path);
    assert!(support::wait_until(|| {
        harness.service.session_state(&path) == Some(SessionState::Failed)
    }));

    engine.set_mode(Mode::Findings);
    harness.service.launch_diagnostics(&path);
    harness.client.expect_publish();
}

#[test]
fn unresolvable_resources_are_not_launched() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::new(engine.clone());
    let path = LspPath::from_lsp_uri("untitled:///never-opened.txt").unwrap();

    assert_eq!(harness.service.launch_diagnostics(&path), None);
    assert_eq!(harness.service.session_state(&path), None);
    harness.client.expect_no_publish(QUIET);
    assert_eq!(engine.calls(), 0);
}

#[test]
fn resources_without_text_are_not_launched() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("blob.bin");
    std::fs::write(&file, [0xff, 0xfe, 0x00]).unwrap();

    let harness = Harness::new(ScriptedEngine::new(Mode::Findings));
    let path = LspPath::from_local_path(&file).unwrap();
    assert_eq!(harness.service.launch_diagnostics(&path), None);
}

#[test]
fn closed_files_are_analyzed_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("Disk.txt");
    std::fs::write(&file, "on disk").unwrap();

    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::new(engine);
    let path = LspPath::from_local_path(&file).unwrap();

    harness.service.launch_diagnostics(&path).expect("launched");
    let (_, _, version) = harness.client.expect_publish();
    assert_eq!(version, None);
}

#[test]
fn disabling_diagnostics_halts_sessions_and_blocks_launches() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::with_config(engine.clone(), support::diagnostics_config(200));
    let path = harness.open(URI, "text");

    harness.service.launch_diagnostics(&path);
    harness.service.set_config(DiagnosticsConfig {
        enabled: false,
        ..harness.service.config()
    });
    assert_eq!(harness.service.session_state(&path), None);
    assert_eq!(harness.service.launch_diagnostics(&path), None);
    harness.client.expect_no_publish(Duration::from_millis(500));
    assert_eq!(engine.calls(), 0);
}

#[test]
fn refresh_relaunches_every_known_resource() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::new(engine.clone());
    let a = harness.open("file:///ws/A.txt", "a");
    let b = harness.open("file:///ws/B.txt", "b");
    harness.open("file:///ws/C.txt", "c");

    harness.service.launch_diagnostics(&a);
    harness.service.launch_diagnostics(&b);
    harness.client.expect_publish();
    harness.client.expect_publish();
    let before = (harness.service.generation(&a), harness.service.generation(&b));

    harness.service.refresh_all();
    harness.client.expect_publish();
    harness.client.expect_publish();
    harness.client.expect_no_publish(QUIET);
    assert!(harness.service.generation(&a) > before.0);
    assert!(harness.service.generation(&b) > before.1);
    assert_eq!(engine.calls(), 4);
}

#[test]
fn each_pass_reports_begin_and_end_progress() {
    let engine = ScriptedEngine::new(Mode::Findings);
    let harness = Harness::new(engine);
    let path = harness.open(URI, "text");

    let generation = harness.service.launch_diagnostics(&path).expect("launched");
    assert!(support::wait_until(|| {
        harness.service.session_state(&path) == Some(SessionState::Completed)
    }));
    // `end` is reported when the pass returns, just after the state change.
    std::thread::sleep(Duration::from_millis(50));

    let token = lsp_types::NumberOrString::String(format!("ideals/diagnostics/{generation}"));
    let kinds: Vec<_> = harness
        .client
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::Progress(t, WorkDoneProgress::Begin(begin)) if t == token => {
                Some(format!("begin:{}", begin.title))
            }
            ClientEvent::Progress(t, WorkDoneProgress::End(_)) if t == token => {
                Some("end".to_string())
            }
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["begin:Analyzing", "end"]);
}
