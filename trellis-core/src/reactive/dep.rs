//! Dependency Graph
//!
//! One `Dep` per observable slot (a property of a target, a ref's value, a
//! computed's output). One `Link` per (dep, subscriber) edge. Links sit on
//! two intrusive doubly linked lists at once: the subscriber's dep list in
//! access order, and the dep's subscriber list in subscription order. Both
//! lists are index-based over generational arenas rather than pointer-based,
//! so a stale id can never reach a reused slot.
//!
//! Link reuse is what makes re-running an effect cheap: at the start of a
//! run every existing link is marked stale; links touched again during the
//! run are revived in place; links still stale at the end were not accessed
//! this time (a conditional branch stopped reading them) and are pruned.

use smallvec::SmallVec;

use crate::value::Key;

use super::runtime::{DepId, LinkId, Runtime, SubId};
use super::subscriber::{SubFlags, SubKind};

/// The key space of one target's dep table.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum DepKey {
    /// A named property, map key, set element, or array index.
    Prop(Key),
    /// Array length.
    Length,
    /// Object key enumeration, map/set entry iteration, collection size.
    Iterate,
    /// Map key iteration.
    MapKeyIterate,
    /// Array element iteration and identity-sensitive searches.
    ArrayIterate,
}

/// The subscriber set for one observable slot.
pub(crate) struct Dep {
    /// Bumped on every trigger.
    pub(crate) version: u64,
    /// Set when this dep is a computed's output; used to pull refreshes
    /// through computed chains during dirtiness checks.
    pub(crate) computed: Option<SubId>,
    pub(crate) subs_head: Option<LinkId>,
    pub(crate) subs_tail: Option<LinkId>,
    /// Cache of the link for the innermost running subscriber, so repeated
    /// reads of one slot within a run skip the list entirely.
    pub(crate) active_link: Option<LinkId>,
    /// Live subscriber count.
    pub(crate) sc: u32,
    /// The owning target/ref/computed is gone; free this dep when the last
    /// link is pruned.
    pub(crate) orphaned: bool,
}

impl Dep {
    pub(crate) fn new(computed: Option<SubId>) -> Self {
        Dep {
            version: 0,
            computed,
            subs_head: None,
            subs_tail: None,
            active_link: None,
            sc: 0,
            orphaned: false,
        }
    }
}

/// One edge between a dep and a subscriber.
pub(crate) struct Link {
    /// Copy of the dep's version at creation or revival; a mismatch with
    /// the dep's current version means the subscriber is stale.
    pub(crate) version: u64,
    /// Set at the start of a run; cleared on access; pruned if still set
    /// when the run ends.
    pub(crate) stale: bool,
    pub(crate) dep: DepId,
    pub(crate) sub: SubId,
    pub(crate) prev_dep: Option<LinkId>,
    pub(crate) next_dep: Option<LinkId>,
    pub(crate) prev_sub: Option<LinkId>,
    pub(crate) next_sub: Option<LinkId>,
    /// Saved `active_link` of the dep, restored when the owning run ends.
    /// Keeps the cache correct across nested runs.
    pub(crate) prev_active: Option<LinkId>,
}

/// A structural mutation on a target, resolved to dep triggers.
pub(crate) enum TargetOp {
    Set {
        key: Key,
        map_target: bool,
    },
    Add {
        key: Key,
        array_index: bool,
        map_target: bool,
    },
    Delete {
        key: Key,
        array_index: bool,
        map_target: bool,
    },
    Clear,
    LengthShrink {
        new_len: usize,
    },
    LengthGrow,
    /// Elements at `start..` shifted positions.
    Splice {
        start: usize,
    },
}

fn push_key(
    keys: &indexmap::IndexMap<DepKey, DepId>,
    key: &DepKey,
    out: &mut SmallVec<[DepId; 4]>,
) {
    if let Some(dep) = keys.get(key) {
        out.push(*dep);
    }
}

impl Runtime {
    /// Record that the active subscriber read `key` of `target`, creating
    /// the dep on first tracked access.
    pub(crate) fn track_target(&mut self, target: u64, key: DepKey) {
        if self.active_sub.is_none() || !self.should_track {
            return;
        }
        let existing = self
            .targets
            .get(&target)
            .and_then(|t| t.keys.get(&key).copied());
        let dep = match existing {
            Some(dep) => dep,
            None => {
                let dep = self.deps.insert(Dep::new(None));
                self.targets.entry(target).or_default().keys.insert(key, dep);
                dep
            }
        };
        self.track(dep);
    }

    /// Link the active subscriber to `dep`, reusing the existing link when
    /// possible. Returns the link that now represents the edge.
    pub(crate) fn track(&mut self, dep: DepId) -> Option<LinkId> {
        let sub = self.active_sub?;
        if !self.should_track {
            return None;
        }
        let d = self.deps.get(dep)?;
        // A computed never depends on its own output.
        if d.computed == Some(sub) {
            return None;
        }
        if let Some(l) = d.active_link {
            if let Some(link) = self.links.get(l) {
                if link.sub == sub {
                    if link.stale {
                        let version = self.deps[dep].version;
                        let needs_move = {
                            let link = &mut self.links[l];
                            link.stale = false;
                            link.version = version;
                            link.next_dep.is_some()
                        };
                        // Keep the dep list in access order.
                        if needs_move {
                            self.move_link_to_deps_tail(sub, l);
                        }
                    }
                    return Some(l);
                }
            }
        }
        Some(self.create_link(dep, sub))
    }

    fn create_link(&mut self, dep: DepId, sub: SubId) -> LinkId {
        let (version, prev_active, subs_tail) = {
            let d = &self.deps[dep];
            (d.version, d.active_link, d.subs_tail)
        };
        let deps_tail = self.subs[sub].deps_tail;
        let l = self.links.insert(Link {
            version,
            stale: false,
            dep,
            sub,
            prev_dep: deps_tail,
            next_dep: None,
            prev_sub: subs_tail,
            next_sub: None,
            prev_active,
        });
        match deps_tail {
            Some(t) => self.links[t].next_dep = Some(l),
            None => self.subs[sub].deps_head = Some(l),
        }
        self.subs[sub].deps_tail = Some(l);
        match subs_tail {
            Some(t) => self.links[t].next_sub = Some(l),
            None => self.deps[dep].subs_head = Some(l),
        }
        let d = &mut self.deps[dep];
        d.subs_tail = Some(l);
        d.active_link = Some(l);
        d.sc += 1;
        l
    }

    fn move_link_to_deps_tail(&mut self, sub: SubId, l: LinkId) {
        let (prev, next) = {
            let link = &self.links[l];
            (link.prev_dep, link.next_dep)
        };
        let Some(next) = next else {
            return; // already the tail
        };
        self.links[next].prev_dep = prev;
        match prev {
            Some(p) => self.links[p].next_dep = Some(next),
            None => self.subs[sub].deps_head = Some(next),
        }
        let tail = self.subs[sub].deps_tail;
        {
            let link = &mut self.links[l];
            link.next_dep = None;
            link.prev_dep = tail;
        }
        match tail {
            Some(t) => self.links[t].next_dep = Some(l),
            None => self.subs[sub].deps_head = Some(l),
        }
        self.subs[sub].deps_tail = Some(l);
    }

    /// Unlink from both lists and discard; frees the dep as well when it is
    /// orphaned and this was its last subscriber.
    pub(crate) fn remove_link(&mut self, l: LinkId) {
        let Some(link) = self.links.remove(l) else {
            return;
        };
        match link.prev_dep {
            Some(p) => {
                if let Some(pl) = self.links.get_mut(p) {
                    pl.next_dep = link.next_dep;
                }
            }
            None => {
                if let Some(rec) = self.subs.get_mut(link.sub) {
                    rec.deps_head = link.next_dep;
                }
            }
        }
        match link.next_dep {
            Some(n) => {
                if let Some(nl) = self.links.get_mut(n) {
                    nl.prev_dep = link.prev_dep;
                }
            }
            None => {
                if let Some(rec) = self.subs.get_mut(link.sub) {
                    rec.deps_tail = link.prev_dep;
                }
            }
        }
        match link.prev_sub {
            Some(p) => {
                if let Some(pl) = self.links.get_mut(p) {
                    pl.next_sub = link.next_sub;
                }
            }
            None => {
                if let Some(d) = self.deps.get_mut(link.dep) {
                    d.subs_head = link.next_sub;
                }
            }
        }
        match link.next_sub {
            Some(n) => {
                if let Some(nl) = self.links.get_mut(n) {
                    nl.prev_sub = link.prev_sub;
                }
            }
            None => {
                if let Some(d) = self.deps.get_mut(link.dep) {
                    d.subs_tail = link.prev_sub;
                }
            }
        }
        let mut free_dep = false;
        if let Some(d) = self.deps.get_mut(link.dep) {
            if d.active_link == Some(l) {
                d.active_link = link.prev_active;
            }
            d.sc = d.sc.saturating_sub(1);
            free_dep = d.sc == 0 && d.orphaned;
        }
        if free_dep {
            self.deps.remove(link.dep);
        }
    }

    /// Remove every link of `sub`.
    pub(crate) fn clear_deps(&mut self, sub: SubId) {
        let mut cursor = self.subs.get(sub).and_then(|r| r.deps_head);
        while let Some(l) = cursor {
            cursor = self.links.get(l).and_then(|link| link.next_dep);
            self.remove_link(l);
        }
        if let Some(rec) = self.subs.get_mut(sub) {
            rec.deps_head = None;
            rec.deps_tail = None;
        }
    }

    /// Run prologue: mark every link stale and make it the dep's active
    /// link, saving the previous one for nested-run restoration.
    pub(crate) fn prepare_deps(&mut self, sub: SubId) {
        let mut cursor = self.subs.get(sub).and_then(|r| r.deps_head);
        while let Some(l) = cursor {
            let dep = self.links[l].dep;
            let prev_active = self.deps.get(dep).and_then(|d| d.active_link);
            {
                let link = &mut self.links[l];
                link.stale = true;
                link.prev_active = prev_active;
                cursor = link.next_dep;
            }
            if let Some(d) = self.deps.get_mut(dep) {
                d.active_link = Some(l);
            }
        }
    }

    /// Run epilogue: restore each dep's active link and prune links that
    /// were not accessed this run. Walks tail to head so the active-link
    /// restoration unwinds in reverse prologue order.
    pub(crate) fn cleanup_deps(&mut self, sub: SubId) {
        let mut cursor = self.subs.get(sub).and_then(|r| r.deps_tail);
        while let Some(l) = cursor {
            let Some(link) = self.links.get_mut(l) else {
                break;
            };
            let dep = link.dep;
            let stale = link.stale;
            let prev_active = link.prev_active;
            link.prev_active = None;
            cursor = link.prev_dep;
            if let Some(d) = self.deps.get_mut(dep) {
                d.active_link = prev_active;
            }
            if stale {
                self.remove_link(l);
            }
        }
    }

    /// Bump versions and notify subscribers of one dep.
    pub(crate) fn trigger_dep(&mut self, dep: DepId) {
        self.global_version = self.global_version.wrapping_add(1);
        let Some(d) = self.deps.get_mut(dep) else {
            return;
        };
        d.version = d.version.wrapping_add(1);
        self.notify_dep(dep);
    }

    fn notify_dep(&mut self, dep: DepId) {
        let mut cursor = self.deps.get(dep).and_then(|d| d.subs_head);
        while let Some(l) = cursor {
            let (sub, next) = match self.links.get(l) {
                Some(link) => (link.sub, link.next_sub),
                None => break,
            };
            self.notify_sub(sub);
            cursor = next;
        }
    }

    fn notify_sub(&mut self, sub: SubId) {
        let Some(rec) = self.subs.get_mut(sub) else {
            return;
        };
        let flags = rec.flags;
        let computed_dep = match &rec.kind {
            SubKind::Computed(c) => Some(c.dep),
            SubKind::Effect(_) => None,
        };
        match computed_dep {
            None => {
                if flags.contains(SubFlags::RUNNING) && !flags.contains(SubFlags::ALLOW_RECURSE) {
                    return;
                }
                if flags.contains(SubFlags::NOTIFIED) {
                    return;
                }
                rec.flags.insert(SubFlags::NOTIFIED);
                rec.next_batch = None;
                match self.batch_tail {
                    Some(tail) => {
                        if let Some(t) = self.subs.get_mut(tail) {
                            t.next_batch = Some(sub);
                        }
                    }
                    None => self.batch_head = Some(sub),
                }
                self.batch_tail = Some(sub);
            }
            Some(own_dep) => {
                rec.flags.insert(SubFlags::DIRTY);
                // Propagate once per batch, and never while this computed
                // is mid-refresh.
                if flags.contains(SubFlags::NOTIFIED) || self.active_sub == Some(sub) {
                    return;
                }
                rec.flags.insert(SubFlags::NOTIFIED);
                self.batched_computeds.push(sub);
                self.notify_dep(own_dep);
            }
        }
    }

    /// Resolve a structural mutation to its dep triggers, per the operation
    /// semantics: point writes hit one dep, structural changes also hit the
    /// enumeration and length deps whose observed results changed.
    pub(crate) fn trigger_op(&mut self, target: u64, op: TargetOp) {
        let mut to_trigger: SmallVec<[DepId; 4]> = SmallVec::new();
        if let Some(tdeps) = self.targets.get(&target) {
            let keys = &tdeps.keys;
            match op {
                TargetOp::Set { key, map_target } => {
                    push_key(keys, &DepKey::Prop(key), &mut to_trigger);
                    if map_target {
                        push_key(keys, &DepKey::Iterate, &mut to_trigger);
                    }
                }
                TargetOp::Add {
                    key,
                    array_index,
                    map_target,
                } => {
                    push_key(keys, &DepKey::Prop(key), &mut to_trigger);
                    if array_index {
                        push_key(keys, &DepKey::Length, &mut to_trigger);
                    } else {
                        push_key(keys, &DepKey::Iterate, &mut to_trigger);
                        if map_target {
                            push_key(keys, &DepKey::MapKeyIterate, &mut to_trigger);
                        }
                    }
                }
                TargetOp::Delete {
                    key,
                    array_index,
                    map_target,
                } => {
                    push_key(keys, &DepKey::Prop(key), &mut to_trigger);
                    if array_index {
                        push_key(keys, &DepKey::ArrayIterate, &mut to_trigger);
                    } else {
                        push_key(keys, &DepKey::Iterate, &mut to_trigger);
                        if map_target {
                            push_key(keys, &DepKey::MapKeyIterate, &mut to_trigger);
                        }
                    }
                }
                TargetOp::Clear => {
                    to_trigger.extend(keys.values().copied());
                }
                TargetOp::LengthShrink { new_len } => {
                    push_key(keys, &DepKey::Length, &mut to_trigger);
                    push_key(keys, &DepKey::ArrayIterate, &mut to_trigger);
                    for (k, d) in keys {
                        if let DepKey::Prop(Key::Int(i)) = k {
                            if *i >= 0 && (*i as usize) >= new_len {
                                to_trigger.push(*d);
                            }
                        }
                    }
                }
                TargetOp::LengthGrow => {
                    push_key(keys, &DepKey::Length, &mut to_trigger);
                    push_key(keys, &DepKey::ArrayIterate, &mut to_trigger);
                }
                TargetOp::Splice { start } => {
                    push_key(keys, &DepKey::Length, &mut to_trigger);
                    push_key(keys, &DepKey::ArrayIterate, &mut to_trigger);
                    for (k, d) in keys {
                        if let DepKey::Prop(Key::Int(i)) = k {
                            if *i >= 0 && (*i as usize) >= start {
                                to_trigger.push(*d);
                            }
                        }
                    }
                }
            }
        }
        if to_trigger.is_empty() {
            // Nothing tracked here yet; still advance the global clock.
            self.global_version = self.global_version.wrapping_add(1);
            return;
        }
        for dep in to_trigger {
            self.trigger_dep(dep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::runtime;

    #[test]
    fn trigger_bumps_versions() {
        let dep = runtime::with(|rt| rt.deps.insert(Dep::new(None)));
        let (v0, g0) = runtime::with(|rt| (rt.deps[dep].version, rt.global_version));
        runtime::with(|rt| rt.trigger_dep(dep));
        let (v1, g1) = runtime::with(|rt| (rt.deps[dep].version, rt.global_version));
        assert_eq!(v1, v0 + 1);
        assert!(g1 > g0);
        runtime::with(|rt| rt.release_dep(dep));
    }

    #[test]
    fn orphaned_dep_without_subscribers_is_freed() {
        let dep = runtime::with(|rt| rt.deps.insert(Dep::new(None)));
        runtime::with(|rt| rt.release_dep(dep));
        assert!(runtime::with(|rt| rt.deps.get(dep).is_none()));
    }

    #[test]
    fn untracked_target_op_only_advances_global_clock() {
        let g0 = runtime::with(|rt| rt.global_version);
        runtime::with(|rt| {
            rt.trigger_op(
                u64::MAX - 1,
                TargetOp::Set {
                    key: Key::from("a"),
                    map_target: false,
                },
            )
        });
        let g1 = runtime::with(|rt| rt.global_version);
        assert_eq!(g1, g0 + 1);
    }
}
