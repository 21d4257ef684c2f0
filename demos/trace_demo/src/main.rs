// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keyed-list session that exercises the tracing and diagnostics pipeline.
//!
//! Mounts a small app on the headless host, then reorders, grows and shrinks a
//! keyed list over several rounds. Scheduler and render-pass events go to both
//! a [`PrettyPrintSink`](trellis_debug::pretty::PrettyPrintSink) on stdout and
//! a [`RecorderSink`](trellis_debug::recorder::RecorderSink), which is exported
//! as Chrome trace JSON at the end.
//!
//! Usage: `trace_demo [OUTPUT]` (default `trace.json`). Set `RUST_LOG=debug`
//! to see the reconciler's own log lines.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::rc::Rc;

use trellis_backend_headless::{EventLoop, HeadlessHost, MonotonicClock, timebase};
use trellis_core::element::{FunctionComponent, Node, Props, h};
use trellis_core::hooks::{Destroy, EffectResult};
use trellis_core::root::{Root, RootConfig};
use trellis_core::scheduler::{Scheduler, SchedulerConfig};
use trellis_core::trace::{
    CommitSummary, EffectErrorEvent, MutationRecord, PhaseBeginEvent, PhaseEndEvent,
    TaskBeginEvent, TaskEndEvent, TraceSink,
};
use trellis_debug::pretty::PrettyPrintSink;
use trellis_debug::recorder::RecorderSink;

/// Forwards every event to a pretty printer and a recorder.
#[derive(Debug)]
struct Tee {
    pretty: PrettyPrintSink,
    recorder: RecorderSink,
}

impl TraceSink for Tee {
    fn on_task_begin(&mut self, e: &TaskBeginEvent) {
        self.pretty.on_task_begin(e);
        self.recorder.on_task_begin(e);
    }

    fn on_task_end(&mut self, e: &TaskEndEvent) {
        self.pretty.on_task_end(e);
        self.recorder.on_task_end(e);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.pretty.on_phase_begin(e);
        self.recorder.on_phase_begin(e);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.pretty.on_phase_end(e);
        self.recorder.on_phase_end(e);
    }

    fn on_effect_error(&mut self, e: &EffectErrorEvent<'_>) {
        self.pretty.on_effect_error(e);
        self.recorder.on_effect_error(e);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.pretty.on_commit_summary(s);
        self.recorder.on_commit_summary(s);
    }

    fn on_mutations(&mut self, pass_index: u64, mutations: &[MutationRecord]) {
        self.pretty.on_mutations(pass_index, mutations);
        self.recorder.on_mutations(pass_index, mutations);
    }
}

fn rounds() -> Vec<Vec<&'static str>> {
    vec![
        vec!["a", "b", "c", "d", "e"],
        vec!["a", "c", "b", "d", "e"],
        vec!["e", "d", "c", "b", "a"],
        vec!["e", "c", "a"],
        vec!["f", "e", "c", "g", "a"],
        vec![],
    ]
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "trace.json".into());

    let stdout: Box<dyn Write> = Box::new(std::io::stdout());
    let sink = Rc::new(RefCell::new(Tee {
        pretty: PrettyPrintSink::with_writer(stdout, timebase()),
        recorder: RecorderSink::new(),
    }));

    let scheduler = Scheduler::new(Rc::new(MonotonicClock::new()), SchedulerConfig::headless());
    scheduler.set_trace_sink(Some(sink.clone() as Rc<RefCell<dyn TraceSink>>));
    let host = Rc::new(RefCell::new(HeadlessHost::new()));
    let container = host.borrow_mut().create_container();
    let root = Root::new(container, host.clone(), scheduler.clone(), RootConfig::new());
    root.set_trace_sink(Some(sink.clone() as Rc<RefCell<dyn TraceSink>>));
    let event_loop = EventLoop::new(scheduler);

    let item = FunctionComponent::new("Item", |cx, props: &Props| {
        let label = props
            .get("label")
            .and_then(|v| v.to_text())
            .unwrap_or_default();
        let mounted = label.clone();
        cx.use_effect(
            move || -> EffectResult {
                log::debug!("item {mounted} mounted");
                let unmounted = mounted.clone();
                let destroy: Destroy = Box::new(move || log::debug!("item {unmounted} unmounted"));
                Ok(Some(destroy))
            },
            Some(Vec::new()),
        );
        h("li").child(label).build()
    });

    for (round, keys) in rounds().into_iter().enumerate() {
        let items: Vec<Node> = keys
            .iter()
            .map(|k| item.element().key(*k).attr("label", *k).build())
            .collect();
        root.render(h("ul").children(items));
        event_loop.run_until_idle().map_err(std::io::Error::other)?;
        let markup = host.borrow().inner_markup(container);
        log::info!("round {round}: {markup}");
        for error in root.take_effect_errors() {
            log::warn!("{error}");
        }
    }

    let file = File::create(&path)?;
    let mut writer = BufWriter::new(file);
    trellis_debug::chrome::export(sink.borrow().recorder.as_bytes(), timebase(), &mut writer)?;

    println!("Wrote {path} ({} host nodes created)", host.borrow().created_count());
    Ok(())
}
