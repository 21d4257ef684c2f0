// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end rendering on the headless host.

use std::cell::RefCell;
use std::rc::Rc;

use trellis_backend_headless::{EventLoop, HeadlessHost, HostOp, MonotonicClock, dispatch_event};
use trellis_core::element::{FunctionComponent, Node, h};
use trellis_core::hooks::{EffectResult, SetState};
use trellis_core::host::HostHandle;
use trellis_core::lane::{EventPriority, Lanes};
use trellis_core::root::{Root, RootConfig};
use trellis_core::scheduler::{Scheduler, SchedulerConfig};
use trellis_core::trace::TraceSink;
use trellis_debug::recorder::{RecordedEvent, RecorderSink, decode};

struct App {
    host: Rc<RefCell<HeadlessHost>>,
    root: Root,
    event_loop: EventLoop,
    container: HostHandle,
}

impl App {
    fn new() -> Self {
        let scheduler = Scheduler::new(Rc::new(MonotonicClock::new()), SchedulerConfig::headless());
        let host = Rc::new(RefCell::new(HeadlessHost::new()));
        let container = host.borrow_mut().create_container();
        let root = Root::new(container, host.clone(), scheduler.clone(), RootConfig::new());
        Self {
            host,
            root,
            event_loop: EventLoop::new(scheduler),
            container,
        }
    }

    fn render(&self, node: impl Into<Node>) {
        self.root.render(node);
        self.settle();
    }

    fn settle(&self) {
        self.event_loop.run_until_idle().unwrap();
    }

    fn markup(&self) -> String {
        self.host.borrow().inner_markup(self.container)
    }

    fn take_ops(&self) -> Vec<HostOp> {
        self.host.borrow_mut().take_ops()
    }

    fn find(&self, tag: &str) -> HostHandle {
        self.host.borrow().find_by_tag(self.container, tag).unwrap()
    }
}

fn list(keys: &[&str]) -> Node {
    h("ul")
        .children(keys.iter().map(|k| h("li").key(*k).child(*k).build()))
        .build()
}

#[test]
fn keyed_li_swap_moves_one_node() {
    let app = App::new();
    app.render(list(&["a", "b", "c", "d"]));
    assert_eq!(
        app.markup(),
        "<ul><li>a</li><li>b</li><li>c</li><li>d</li></ul>"
    );
    let ul = app.find("ul");
    let before = app.host.borrow().children(ul).to_vec();
    app.take_ops();

    app.render(list(&["a", "c", "b", "d"]));
    assert_eq!(
        app.markup(),
        "<ul><li>a</li><li>c</li><li>b</li><li>d</li></ul>"
    );
    let after = app.host.borrow().children(ul).to_vec();
    assert_eq!(after, [before[0], before[2], before[1], before[3]]);
    assert_eq!(
        app.take_ops(),
        [HostOp::InsertBefore {
            parent: ul,
            child: before[1],
            before: before[3],
        }],
        "the swap reuses every node and places exactly one"
    );
}

#[test]
fn unchanged_list_produces_no_host_calls() {
    let app = App::new();
    app.render(list(&["x", "y"]));
    app.take_ops();
    app.render(list(&["x", "y"]));
    assert!(app.take_ops().is_empty());
}

#[test]
fn click_listener_updates_state() {
    let app = App::new();
    let counter = FunctionComponent::new("Counter", |cx, _| {
        let (count, set) = cx.use_state(|| 0_i32);
        h("button")
            .on("onClick", move |_| set.update(|n| n + 1))
            .child(count.to_string())
            .build()
    });
    app.render(counter.element());
    assert_eq!(app.markup(), "<button>0</button>");

    let button = app.find("button");
    assert_eq!(dispatch_event(&app.host, button, "onClick", &()), 1);
    assert_eq!(dispatch_event(&app.host, button, "onClick", &()), 1);
    app.settle();
    assert_eq!(app.markup(), "<button>2</button>");
    assert_eq!(app.find("button"), button, "the button is patched in place");
}

#[test]
fn layout_effects_run_before_passive_effects() {
    let app = App::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let component = {
        let log = log.clone();
        FunctionComponent::new("Logger", move |cx, _| {
            let passive = log.clone();
            cx.use_effect(
                move || -> EffectResult {
                    passive.borrow_mut().push("passive");
                    Ok(None)
                },
                None,
            );
            let layout = log.clone();
            cx.use_layout_effect(
                move || -> EffectResult {
                    layout.borrow_mut().push("layout");
                    Ok(None)
                },
                None,
            );
            h("div").build()
        })
    };
    app.render(component.element());
    assert_eq!(*log.borrow(), ["layout", "passive"]);
}

#[test]
fn unmount_releases_every_host_node() {
    let app = App::new();
    app.render(
        h("section")
            .child(list(&["a", "b"]))
            .child(h("p").child("tail")),
    );
    assert!(app.host.borrow().live_count() > 1);
    app.root.unmount();
    app.settle();
    assert_eq!(app.markup(), "");
    assert_eq!(app.host.borrow().live_count(), 1, "only the container is left");
}

#[test]
fn urgent_update_commits_before_transition() {
    let app = App::new();
    let recorder = Rc::new(RefCell::new(RecorderSink::new()));
    app.root
        .set_trace_sink(Some(recorder.clone() as Rc<RefCell<dyn TraceSink>>));

    let setters: Rc<RefCell<Vec<SetState<&'static str>>>> = Rc::default();
    let label = |name: &'static str| {
        let setters = setters.clone();
        FunctionComponent::new(name, move |cx, _| {
            let (value, set) = cx.use_state(|| "idle");
            setters.borrow_mut().push(set);
            h("span").child(*value).build()
        })
    };
    let (slow, fast) = (label("Slow"), label("Fast"));
    app.render(h("div").child(slow.element()).child(fast.element()));
    assert_eq!(app.markup(), "<div><span>idle</span><span>idle</span></div>");
    recorder.borrow_mut().clear();

    let (set_slow, set_fast) = {
        let setters = setters.borrow();
        (setters[0].clone(), setters[1].clone())
    };
    app.root.start_transition(|| set_slow.set("done"));
    app.root
        .run_with_priority(EventPriority::Discrete, || set_fast.set("now"));
    assert!(app.root.pending_lanes().includes_some(Lanes::SYNC));
    assert!(app.root.pending_lanes().includes_some(Lanes::TRANSITIONS));

    app.settle();
    assert_eq!(app.markup(), "<div><span>done</span><span>now</span></div>");

    let recorder = recorder.borrow();
    let passes: Vec<Lanes> = decode(recorder.as_bytes())
        .filter_map(|event| match event {
            RecordedEvent::CommitSummary(s) => Some(s.lanes),
            _ => None,
        })
        .collect();
    assert_eq!(passes, [Lanes::SYNC, Lanes::TRANSITION_1]);
}
