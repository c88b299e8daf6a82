use std::cell::RefCell;
use std::rc::Rc;

use tessera_core::config::FrameTreeConfig;
use tessera_core::{ErrorClass, FrameRoute, FrameTreeError, FrameTreeNodeId, ProcessId, RoutingId};
use tessera_frame_tree::{
    FrameReplicationState, FrameTree, FrameTreeDelegate, FrameTreeNode, FrameTrees,
    NavigationRequest, SandboxFlags, LOADING_PROGRESS_DONE,
};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    StartedLoading(FrameTreeNodeId, bool),
    StoppedLoading,
    Progress(f64),
    Removed(FrameTreeNodeId),
    Proxy(FrameTreeNodeId, ProcessId),
    CleanUp(FrameTreeNodeId),
    OpenerCleared(FrameTreeNodeId),
}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<Event>>,
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    fn count(&self, wanted: &Event) -> usize {
        self.events.borrow().iter().filter(|e| *e == wanted).count()
    }
}

impl FrameTreeDelegate for Recorder {
    fn did_start_loading(&self, _tree: &FrameTree, node: FrameTreeNodeId, to_different_document: bool) {
        self.events
            .borrow_mut()
            .push(Event::StartedLoading(node, to_different_document));
    }

    fn did_stop_loading(&self, _tree: &FrameTree) {
        self.events.borrow_mut().push(Event::StoppedLoading);
    }

    fn did_change_load_progress(&self, _tree: &FrameTree, progress: f64) {
        self.events.borrow_mut().push(Event::Progress(progress));
    }

    fn frame_removed(&self, tree: &FrameTree, node: &FrameTreeNode) {
        // Removed nodes are already unreachable when observers hear about them.
        assert!(!tree.contains(node.id()));
        assert!(tree.nodes().all(|other| !other.children().contains(&node.id())));
        self.events.borrow_mut().push(Event::Removed(node.id()));
    }

    fn create_proxy(&self, _tree: &FrameTree, node: FrameTreeNodeId, process_id: ProcessId) {
        self.events.borrow_mut().push(Event::Proxy(node, process_id));
    }

    fn clean_up_navigation(&self, _tree: &FrameTree, node: FrameTreeNodeId, _request: &NavigationRequest) {
        self.events.borrow_mut().push(Event::CleanUp(node));
    }

    fn opener_cleared(&self, _tree: &FrameTree, node: FrameTreeNodeId) {
        self.events.borrow_mut().push(Event::OpenerCleared(node));
    }
}

const P: ProcessId = ProcessId(10);
const Q: ProcessId = ProcessId(20);

fn route(process_id: ProcessId, routing_id: i32) -> FrameRoute {
    FrameRoute::new(process_id, RoutingId(routing_id))
}

fn setup() -> (FrameTrees, Rc<Recorder>, FrameTreeNodeId) {
    let mut trees = FrameTrees::new(&FrameTreeConfig::default());
    let recorder = Rc::new(Recorder::default());
    let tree_id = trees
        .create_frame_tree(route(P, 1), FrameReplicationState::named("main"), recorder.clone())
        .unwrap();
    let root = trees.tree(tree_id).unwrap().root();
    (trees, recorder, root)
}

fn child(trees: &mut FrameTrees, parent: FrameTreeNodeId, process_id: ProcessId, routing_id: i32) -> FrameTreeNodeId {
    trees
        .create_child(parent, process_id, RoutingId(routing_id), FrameReplicationState::default())
        .unwrap()
}

fn assert_consistent(trees: &FrameTrees) {
    let mut live = 0;
    for tree in trees.trees() {
        for node in tree.nodes() {
            live += 1;
            assert_eq!(
                trees.globally_find_by_id(node.id()).map(FrameTreeNode::id),
                Some(node.id())
            );
            assert_eq!(trees.find_by_route(node.route()), Some(node.id()));
            match node.parent() {
                None => assert_eq!(node.id(), tree.root()),
                Some(parent) => assert!(tree.node(parent).unwrap().children().contains(&node.id())),
            }
            for child in node.children() {
                assert_eq!(tree.node(*child).unwrap().parent(), Some(node.id()));
            }
        }
    }
    assert_eq!(live, trees.node_count());
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn end_to_end_create_reject_remove() {
    let (mut trees, _recorder, root) = setup();
    assert_eq!(root, FrameTreeNodeId(1));

    let second = trees
        .create_child(root, P, RoutingId(2), FrameReplicationState::default())
        .unwrap();
    assert_eq!(second, FrameTreeNodeId(2));
    assert_eq!(trees.globally_find_by_id(second).unwrap().parent(), Some(root));

    let err = trees
        .create_child(root, Q, RoutingId(3), FrameReplicationState::default())
        .unwrap_err();
    assert_eq!(
        err,
        FrameTreeError::ProcessMismatch {
            parent: root,
            expected: P,
            actual: Q
        }
    );
    assert_eq!(err.class(), ErrorClass::ProtocolViolation);
    assert_eq!(trees.globally_find_by_id(root).unwrap().child_count(), 1);

    trees.remove_child(root, second).unwrap();
    assert_eq!(trees.globally_find_by_id(root).unwrap().child_count(), 0);
    assert!(trees.globally_find_by_id(second).is_none());
    assert_consistent(&trees);
}

#[test]
fn tree_stays_consistent_under_mixed_mutations() {
    let (mut trees, recorder, root) = setup();
    let mut live = vec![root];
    let mut next_routing_id = 2;
    // Small deterministic LCG so the sequence is reproducible.
    let mut seed: u32 = 0x2545_f491;
    let mut next = |bound: usize| {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (seed >> 16) as usize % bound
    };

    for _ in 0..200 {
        if live.len() > 1 && next(3) == 0 {
            let victim = live[1 + next(live.len() - 1)];
            let parent = trees.globally_find_by_id(victim).unwrap().parent().unwrap();
            trees.remove_child(parent, victim).unwrap();
        } else {
            let parent = live[next(live.len())];
            child(&mut trees, parent, P, next_routing_id);
            next_routing_id += 1;
        }
        live.retain(|id| trees.globally_find_by_id(*id).is_some());
        for tree in trees.trees() {
            for node in tree.nodes() {
                if !live.contains(&node.id()) {
                    live.push(node.id());
                }
            }
        }
        assert_consistent(&trees);
    }

    // Every id was handed out once and every removal was reported once.
    let removed: Vec<_> = recorder
        .take()
        .into_iter()
        .filter_map(|e| match e {
            Event::Removed(id) => Some(id),
            _ => None,
        })
        .collect();
    let mut unique = removed.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), removed.len());
    assert_eq!(removed.len() + trees.node_count(), next_routing_id as usize - 1);
}

#[test]
fn removal_errors_are_typed() {
    let (mut trees, _recorder, root) = setup();
    let a = child(&mut trees, root, P, 2);
    let b = child(&mut trees, a, P, 3);

    assert_eq!(
        trees.remove_child(root, b),
        Err(FrameTreeError::NotAChild {
            parent: root,
            child: b
        })
    );
    let missing = FrameTreeNodeId(99);
    let err = trees.remove_child(missing, a).unwrap_err();
    assert_eq!(err, FrameTreeError::NodeNotFound(missing));
    assert_eq!(err.class(), ErrorClass::GracefulAbsence);
    assert_eq!(trees.detach_frame(root), Err(FrameTreeError::RootRemoval(root)));
    assert_eq!(
        trees.create_child(root, P, RoutingId(2), FrameReplicationState::default()),
        Err(FrameTreeError::RouteInUse(route(P, 2)))
    );
}

#[test]
fn removing_a_subtree_reports_children_before_parents() {
    let (mut trees, recorder, root) = setup();
    let a = child(&mut trees, root, P, 2);
    let b = child(&mut trees, a, P, 3);
    let c = child(&mut trees, b, P, 4);
    recorder.take();

    trees.detach_frame(a).unwrap();
    assert_eq!(
        recorder.take(),
        vec![Event::Removed(c), Event::Removed(b), Event::Removed(a)]
    );
    assert_eq!(trees.node_count(), 1);
    assert!(trees.find_by_route(route(P, 3)).is_none());
}

#[test]
fn destroyed_opener_is_cleared() {
    let (mut trees, recorder, root) = setup();
    let opener = child(&mut trees, root, P, 2);

    let popup_delegate = Rc::new(Recorder::default());
    let popup_tree = trees
        .create_frame_tree(route(Q, 1), FrameReplicationState::named("popup"), popup_delegate.clone())
        .unwrap();
    let popup = trees.tree(popup_tree).unwrap().root();

    trees.set_opener(popup, Some(opener)).unwrap();
    // Mutual openers must not keep each other alive.
    trees.set_opener(opener, Some(popup)).unwrap();
    assert_eq!(trees.globally_find_by_id(popup).unwrap().opener(), Some(opener));

    trees.remove_child(root, opener).unwrap();
    assert_eq!(trees.globally_find_by_id(popup).unwrap().opener(), None);
    assert_eq!(popup_delegate.take(), vec![Event::OpenerCleared(popup)]);
    assert_eq!(recorder.take(), vec![Event::Removed(opener)]);

    // Later accesses are harmless.
    trees.set_opener(popup, None).unwrap();
    assert_eq!(
        trees.set_opener(popup, Some(opener)),
        Err(FrameTreeError::NodeNotFound(opener))
    );
    assert_consistent(&trees);
}

#[test]
fn replacing_an_opener_stops_observing_the_old_one() {
    let (mut trees, _recorder, root) = setup();
    let first = child(&mut trees, root, P, 2);
    let second = child(&mut trees, root, P, 3);
    let opened = child(&mut trees, root, P, 4);

    trees.set_opener(opened, Some(first)).unwrap();
    trees.set_opener(opened, Some(second)).unwrap();
    trees.remove_child(root, first).unwrap();
    assert_eq!(trees.globally_find_by_id(opened).unwrap().opener(), Some(second));
}

#[test]
fn destroying_a_tree_clears_openers_elsewhere() {
    let (mut trees, recorder, root) = setup();
    let popup_tree = trees
        .create_frame_tree(route(Q, 1), FrameReplicationState::default(), recorder.clone())
        .unwrap();
    let popup_root = trees.tree(popup_tree).unwrap().root();
    trees.set_opener(root, Some(popup_root)).unwrap();
    recorder.take();

    assert!(trees.destroy_frame_tree(popup_tree));
    assert!(!trees.destroy_frame_tree(popup_tree));
    assert_eq!(trees.globally_find_by_id(root).unwrap().opener(), None);
    assert_eq!(
        recorder.take(),
        vec![Event::OpenerCleared(root), Event::Removed(popup_root)]
    );
    assert_consistent(&trees);
}

#[test]
fn stopping_twice_notifies_once() {
    let (mut trees, recorder, root) = setup();
    trees.did_start_loading(root, true).unwrap();
    trees.did_stop_loading(root).unwrap();
    trees.did_stop_loading(root).unwrap();

    let node = trees.globally_find_by_id(root).unwrap();
    assert_eq!(node.loading_progress(), LOADING_PROGRESS_DONE);
    assert!(!node.is_loading());
    assert_eq!(recorder.count(&Event::StoppedLoading), 1);
    assert_eq!(recorder.count(&Event::StartedLoading(root, true)), 1);
}

#[test]
fn tree_loading_is_aggregated_over_frames() {
    let (mut trees, recorder, root) = setup();
    let frame = child(&mut trees, root, P, 2);

    trees.did_start_loading(root, true).unwrap();
    trees.did_start_loading(frame, true).unwrap();
    trees.did_stop_loading(root).unwrap();
    // The child still loads, so the tree has not stopped.
    assert_eq!(recorder.count(&Event::StoppedLoading), 0);
    let tree = trees.tree_of(root).unwrap();
    assert!(tree.is_loading());
    assert!(approx(tree.load_progress(), 0.55));

    trees.did_stop_loading(frame).unwrap();
    let events = recorder.take();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::StartedLoading(..)))
            .count(),
        1
    );
    assert_eq!(events.last(), Some(&Event::StoppedLoading));
    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[1] > w[0]));
    assert!(approx(*progress.last().unwrap(), 1.0));
}

#[test]
fn progress_reports_only_increase() {
    let (mut trees, recorder, root) = setup();
    trees.did_start_loading(root, true).unwrap();
    trees.did_change_load_progress(root, 0.6).unwrap();
    trees.did_change_load_progress(root, 0.4).unwrap();
    assert_eq!(
        recorder.take(),
        vec![
            Event::StartedLoading(root, true),
            Event::Progress(0.1),
            Event::Progress(0.6),
        ]
    );
    // The node itself still tracks what it was told.
    assert!(approx(trees.globally_find_by_id(root).unwrap().loading_progress(), 0.4));

    // A new main document replaces the load in flight and starts the aggregate over.
    trees.did_start_loading(root, true).unwrap();
    assert_eq!(recorder.take(), vec![Event::Progress(0.1)]);
}

#[test]
fn restarting_the_main_document_notifies_once() {
    let (mut trees, recorder, root) = setup();
    trees.did_start_loading(root, true).unwrap();
    trees.did_start_loading(root, true).unwrap();
    assert!(trees.tree_of(root).unwrap().is_loading());

    let events = recorder.take();
    let starts = events
        .iter()
        .filter(|e| matches!(e, Event::StartedLoading(..)))
        .count();
    let stops = events
        .iter()
        .filter(|e| matches!(e, Event::StoppedLoading))
        .count();
    assert_eq!((starts, stops), (1, 0));

    trees.did_stop_loading(root).unwrap();
    assert_eq!(recorder.count(&Event::StoppedLoading), 1);
}

#[test]
fn same_document_start_while_loading_is_ignored() {
    let (mut trees, recorder, root) = setup();
    trees.did_start_loading(root, false).unwrap();
    trees.did_start_loading(root, false).unwrap();
    assert_eq!(recorder.count(&Event::StartedLoading(root, false)), 1);
}

#[test]
fn cancelled_navigation_stops_loading_and_cleans_up() {
    let (mut trees, recorder, root) = setup();
    let request = NavigationRequest::new(Url::parse("https://example.org/").unwrap())
        .with_speculative_route(route(Q, 7));

    trees.created_navigation_request(root, request).unwrap();
    assert!(trees.tree_of(root).unwrap().is_loading());
    assert_eq!(
        recorder.take(),
        vec![Event::StartedLoading(root, true), Event::Progress(0.1)]
    );

    trees.reset_navigation_request(root, false).unwrap();
    assert!(!trees.tree_of(root).unwrap().is_loading());
    assert_eq!(
        recorder.take(),
        vec![Event::Progress(1.0), Event::StoppedLoading, Event::CleanUp(root)]
    );

    // Nothing left to reset.
    trees.reset_navigation_request(root, false).unwrap();
    assert!(recorder.take().is_empty());
}

#[test]
fn replacing_a_navigation_keeps_loading_state() {
    let (mut trees, recorder, root) = setup();
    let first = NavigationRequest::new(Url::parse("https://a.example/").unwrap());
    let second = NavigationRequest::new(Url::parse("https://b.example/").unwrap());

    trees.created_navigation_request(root, first).unwrap();
    recorder.take();
    trees.created_navigation_request(root, second).unwrap();
    assert!(recorder.take().is_empty());
    assert_eq!(
        trees
            .globally_find_by_id(root)
            .unwrap()
            .navigation_request()
            .unwrap()
            .url
            .host_str(),
        Some("b.example")
    );

    let changed = trees
        .did_commit_navigation(root, Url::parse("https://b.example/page").unwrap())
        .unwrap();
    assert!(!changed);
    let node = trees.globally_find_by_id(root).unwrap();
    assert!(node.navigation_request().is_none());
    assert_eq!(node.current_url().unwrap().path(), "/page");
    assert!(recorder.take().is_empty());
}

#[test]
fn javascript_navigations_do_not_start_loading() {
    let (mut trees, recorder, root) = setup();
    let request = NavigationRequest::new(Url::parse("javascript:void(0)").unwrap());
    trees.created_navigation_request(root, request).unwrap();
    assert!(recorder.take().is_empty());
}

#[test]
fn descendant_checks_walk_parents_and_skip_leaves() {
    let (mut trees, _recorder, root) = setup();
    let middle = child(&mut trees, root, P, 2);
    let leaf = child(&mut trees, middle, P, 3);
    let tree = trees.tree_of(root).unwrap();

    assert!(tree.is_descendant_of(leaf, root));
    assert!(tree.is_descendant_of(leaf, middle));
    assert!(!tree.is_descendant_of(root, root));
    assert!(!tree.is_descendant_of(middle, middle));
    assert!(!tree.is_descendant_of(root, middle));
    // A leaf short-circuits, including the node itself.
    assert!(!tree.is_descendant_of(leaf, leaf));
    assert!(!tree.is_descendant_of(middle, leaf));
}

#[test]
fn sandbox_flags_apply_on_the_next_commit() {
    let (mut trees, _recorder, root) = setup();
    let frame = child(&mut trees, root, P, 2);
    let grandchild = child(&mut trees, frame, P, 3);

    trees
        .set_child_sandbox_flags(root, frame, SandboxFlags::SCRIPTS | SandboxFlags::POPUPS)
        .unwrap();
    assert_eq!(
        trees.set_child_sandbox_flags(root, grandchild, SandboxFlags::all()),
        Err(FrameTreeError::NotAChild {
            parent: root,
            child: grandchild
        })
    );
    let node = trees.globally_find_by_id(frame).unwrap();
    assert_eq!(node.effective_sandbox_flags(), SandboxFlags::empty());

    let changed = trees
        .did_commit_navigation(frame, Url::parse("https://frame.example/").unwrap())
        .unwrap();
    assert!(changed);
    let node = trees.globally_find_by_id(frame).unwrap();
    assert_eq!(
        node.effective_sandbox_flags(),
        SandboxFlags::SCRIPTS | SandboxFlags::POPUPS
    );
    assert_eq!(
        node.replication_state().origin.as_deref(),
        Some("https://frame.example")
    );
}

#[test]
fn transfer_moves_the_frame_and_creates_proxies() {
    let (mut trees, recorder, root) = setup();
    let frame = child(&mut trees, root, P, 2);
    let doomed = child(&mut trees, frame, P, 3);
    trees
        .did_commit_navigation(frame, Url::parse("https://old.example/").unwrap())
        .unwrap();
    recorder.take();

    let old = trees.transfer_frame(frame, route(Q, 5)).unwrap();
    assert_eq!(old, route(P, 2));
    assert_eq!(
        recorder.take(),
        vec![
            Event::Removed(doomed),
            Event::Proxy(frame, P),
            Event::Proxy(root, Q)
        ]
    );
    let node = trees.globally_find_by_id(frame).unwrap();
    assert_eq!(node.route(), route(Q, 5));
    assert!(node.current_url().is_none());
    assert!(node.has_proxy_in(P));
    assert_eq!(trees.find_by_route(route(Q, 5)), Some(frame));
    assert!(trees.find_by_route(route(P, 2)).is_none());

    // Children of the moved frame are mirrored into the old process.
    let nested = child(&mut trees, frame, Q, 6);
    assert_eq!(recorder.take(), vec![Event::Proxy(nested, P)]);
    assert_eq!(
        trees.create_child(frame, P, RoutingId(9), FrameReplicationState::default()),
        Err(FrameTreeError::ProcessMismatch {
            parent: frame,
            expected: Q,
            actual: P
        })
    );
    assert_consistent(&trees);

    assert_eq!(trees.process_gone(Q), vec![frame, nested]);
    assert!(!trees.globally_find_by_id(root).unwrap().has_proxy_in(Q));
}

#[test]
fn proxies_are_not_propagated_without_site_isolation() {
    let mut trees = FrameTrees::new(&FrameTreeConfig {
        site_per_process: false,
    });
    let recorder = Rc::new(Recorder::default());
    let tree_id = trees
        .create_frame_tree(route(P, 1), FrameReplicationState::default(), recorder.clone())
        .unwrap();
    let root = trees.tree(tree_id).unwrap().root();
    let frame = child(&mut trees, root, P, 2);

    trees.transfer_frame(frame, route(Q, 3)).unwrap();
    assert!(recorder.take().is_empty());
    let nested = child(&mut trees, frame, Q, 4);
    assert!(trees.globally_find_by_id(nested).unwrap().proxy_processes().is_empty());
}

#[test]
fn process_swap_reset_destroys_children_only() {
    let (mut trees, recorder, root) = setup();
    let a = child(&mut trees, root, P, 2);
    let b = child(&mut trees, root, P, 3);
    trees
        .did_commit_navigation(root, Url::parse("https://main.example/").unwrap())
        .unwrap();
    recorder.take();

    trees.reset_for_process_swap(root).unwrap();
    let events = recorder.take();
    assert!(events.contains(&Event::Removed(a)));
    assert!(events.contains(&Event::Removed(b)));
    let node = trees.globally_find_by_id(root).unwrap();
    assert_eq!(node.child_count(), 0);
    assert!(node.current_url().is_none());
    assert_eq!(trees.node_count(), 1);
}

#[test]
fn removing_the_last_loading_frame_stops_the_tree() {
    let (mut trees, recorder, root) = setup();
    let frame = child(&mut trees, root, P, 2);
    trees.did_start_loading(frame, true).unwrap();
    recorder.take();

    trees.remove_child(root, frame).unwrap();
    assert!(!trees.tree_of(root).unwrap().is_loading());
    assert_eq!(recorder.take(), vec![Event::Removed(frame), Event::StoppedLoading]);
}

#[test]
fn node_ids_are_never_reused() {
    let (mut trees, _recorder, root) = setup();
    let first = child(&mut trees, root, P, 2);
    trees.remove_child(root, first).unwrap();
    let second = child(&mut trees, root, P, 2);
    assert!(second > first);
}
