//! Narrative Builders
//!
//! Slides present states of the provenance graph. A story is a chain of
//! slides linked by `next` edges, starting at a slide without predecessor;
//! a slide shows a state through its `jumpTo` edge, or only text when it has
//! none. These edits touch slides only, never actions or states.

use super::error::ProvenanceError;
use super::provenance_graph::{
    ProvenanceGraph, ProvenanceResult, ProvenanceState, SelectionTarget, DEFAULT_SELECTION,
};
use crate::db::{ProvenanceEvent, SelectOperation};
use crate::models::{EdgeId, EdgeKind, GraphNode, NodeId, NodeKind, NodeRecord, SlideNode};
use std::collections::HashSet;

/// Title of a text slide created without one
pub const DEFAULT_TEXT_SLIDE_TITLE: &str = "Unnamed Slide";
/// Title slide of an extracted story
pub const STORY_START_TITLE: &str = "Unnamed Story";
/// Closing slide of an extracted story
pub const STORY_END_TITLE: &str = "Thanks";

impl ProvenanceState {
    fn slide(&self, id: NodeId) -> ProvenanceResult<&SlideNode> {
        self.store
            .node(id)
            .and_then(GraphNode::as_slide)
            .ok_or(ProvenanceError::UnknownSlide(id))
    }

    fn next_slide(&self, id: NodeId) -> Option<NodeId> {
        self.store.first_target(id, EdgeKind::Next)
    }

    fn previous_slide(&self, id: NodeId) -> Option<NodeId> {
        self.store.first_source(id, EdgeKind::Next)
    }

    fn jump_target(&self, id: NodeId) -> Option<NodeId> {
        self.store.first_target(id, EdgeKind::JumpTo)
    }

    /// Slides from `start` following `next`, stopping at a repeated slide
    fn slide_path(&self, start: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut path = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            path.push(id);
            current = self.next_slide(id);
        }
        path
    }

    fn story_start(&self, id: NodeId) -> NodeId {
        let mut seen = HashSet::from([id]);
        let mut start = id;
        while let Some(prev) = self.previous_slide(start) {
            if !seen.insert(prev) {
                break;
            }
            start = prev;
        }
        start
    }

    fn slide_chains(&self) -> Vec<NodeId> {
        self.ids_of(NodeKind::Story)
            .into_iter()
            .filter(|id| self.previous_slide(*id).is_none())
            .collect()
    }

    fn edge_ids(&self, id: NodeId, kind: EdgeKind, outgoing: bool) -> Vec<EdgeId> {
        let edges = if outgoing {
            self.store.outgoing(id, kind)
        } else {
            self.store.incoming(id, kind)
        };
        edges.into_iter().map(|e| e.id).collect()
    }

    fn remove_edges(&mut self, edges: Vec<EdgeId>) -> ProvenanceResult<()> {
        for edge in edges {
            self.store.remove_edge(edge)?;
        }
        Ok(())
    }

    fn add_slide(&mut self, slide: SlideNode) -> ProvenanceResult<NodeId> {
        let id = self.store.add_node(NodeRecord::Story(slide))?;
        self.emit(ProvenanceEvent::AddSlide { id });
        Ok(id)
    }

    fn wrap_as_slide(&mut self, state: NodeId) -> ProvenanceResult<NodeId> {
        self.ensure_state(state)?;
        let name = self
            .store
            .node(state)
            .map(|n| n.record.name().to_string())
            .unwrap_or_default();
        let slide = self.add_slide(SlideNode::new(name))?;
        self.store.add_edge(slide, EdgeKind::JumpTo, state)?;
        Ok(slide)
    }

    fn make_text_slide(&mut self, title: Option<&str>) -> ProvenanceResult<NodeId> {
        self.add_slide(SlideNode::text_slide(
            title.unwrap_or(DEFAULT_TEXT_SLIDE_TITLE),
        ))
    }

    /// One slide per state, chained in order
    fn chain_state_slides(&mut self, states: &[NodeId]) -> ProvenanceResult<Vec<NodeId>> {
        for state in states {
            self.ensure_state(*state)?;
        }
        let mut slides: Vec<NodeId> = Vec::with_capacity(states.len());
        for state in states {
            let slide = self.wrap_as_slide(*state)?;
            if let Some(&prev) = slides.last() {
                self.store.add_edge(prev, EdgeKind::Next, slide)?;
            }
            slides.push(slide);
        }
        Ok(slides)
    }

    fn extract_slide(&mut self, states: &[NodeId]) -> ProvenanceResult<NodeId> {
        for state in states {
            self.ensure_state(*state)?;
        }
        let start = self.make_text_slide(Some(STORY_START_TITLE))?;
        let slides = self.chain_state_slides(states)?;
        let end = self.make_text_slide(Some(STORY_END_TITLE))?;
        let mut chain = Vec::with_capacity(slides.len() + 2);
        chain.push(start);
        chain.extend(slides);
        chain.push(end);
        for pair in chain.windows(2) {
            if self.next_slide(pair[0]) != Some(pair[1]) {
                self.store.add_edge(pair[0], EdgeKind::Next, pair[1])?;
            }
        }
        self.emit(ProvenanceEvent::ExtractSlide { id: start });
        Ok(start)
    }

    fn move_slide(&mut self, node: NodeId, to: NodeId, before: bool) -> ProvenanceResult<()> {
        self.slide(node)?;
        self.slide(to)?;
        if node == to {
            return Ok(());
        }
        let in_place = if before {
            self.next_slide(node) == Some(to)
        } else {
            self.previous_slide(node) == Some(to)
        };
        if in_place {
            return Ok(());
        }

        // take the slide out, linking its neighbours
        if let Some(prev) = self.previous_slide(node) {
            for next in self.store.targets(node, EdgeKind::Next) {
                self.store.add_edge(prev, EdgeKind::Next, next)?;
            }
        }
        let mut attached = self.edge_ids(node, EdgeKind::Next, true);
        attached.extend(self.edge_ids(node, EdgeKind::Next, false));
        self.remove_edges(attached)?;

        if before {
            if let Some(target_prev) = self.previous_slide(to) {
                let incoming = self.edge_ids(to, EdgeKind::Next, false);
                self.remove_edges(incoming)?;
                self.store.add_edge(target_prev, EdgeKind::Next, node)?;
            }
            self.store.add_edge(node, EdgeKind::Next, to)?;
        } else {
            let target_nexts = self.store.targets(to, EdgeKind::Next);
            let outgoing = self.edge_ids(to, EdgeKind::Next, true);
            self.remove_edges(outgoing)?;
            for next in target_nexts {
                self.store.add_edge(node, EdgeKind::Next, next)?;
            }
            self.store.add_edge(to, EdgeKind::Next, node)?;
        }
        self.emit(ProvenanceEvent::MoveSlide {
            id: node,
            to,
            before,
        });
        Ok(())
    }

    fn remove_slide_node(&mut self, node: NodeId) -> ProvenanceResult<()> {
        self.slide(node)?;
        if let Some(prev) = self.previous_slide(node) {
            for next in self.store.targets(node, EdgeKind::Next) {
                self.store.add_edge(prev, EdgeKind::Next, next)?;
            }
        }
        self.store.remove_node(node)?;
        self.selections.forget(node);
        self.emit(ProvenanceEvent::RemoveSlide { id: node });
        Ok(())
    }

    fn set_slide_jump_to_target(
        &mut self,
        slide: NodeId,
        state: Option<NodeId>,
    ) -> ProvenanceResult<()> {
        self.slide(slide)?;
        if let Some(state) = state {
            self.ensure_state(state)?;
        }
        let old_edge = self.store.outgoing(slide, EdgeKind::JumpTo).first().map(|e| (e.id, e.target));
        if let Some((edge, _)) = old_edge {
            self.store.remove_edge(edge)?;
        }
        if let Some(state) = state {
            self.store.add_edge(slide, EdgeKind::JumpTo, state)?;
        }
        self.emit(ProvenanceEvent::SetJumpTarget {
            slide,
            old: old_edge.map(|(_, target)| target),
            new: state,
        });
        Ok(())
    }
}

impl ProvenanceGraph {
    /// Every slide of the graph
    pub fn slides(&self) -> Vec<NodeId> {
        self.with_state(|state| state.ids_of(NodeKind::Story))
    }

    /// Same as [`slides`](Self::slides)
    pub fn stories(&self) -> Vec<NodeId> {
        self.slides()
    }

    pub fn slide(&self, id: NodeId) -> Option<SlideNode> {
        self.with_state(|state| state.slide(id).ok().cloned())
    }

    /// First slides of all stories
    pub fn slide_chains(&self) -> Vec<NodeId> {
        self.with_state(ProvenanceState::slide_chains)
    }

    /// The slides of every story, in order
    pub fn stories_paths(&self) -> Vec<Vec<NodeId>> {
        self.with_state(|state| {
            state
                .slide_chains()
                .into_iter()
                .map(|start| state.slide_path(start))
                .collect()
        })
    }

    /// The story `slide` starts, in order
    pub fn slide_path(&self, slide: NodeId) -> Vec<NodeId> {
        self.with_state(|state| state.slide_path(slide))
    }

    /// The state a slide shows
    pub fn slide_jump_target(&self, slide: NodeId) -> Option<NodeId> {
        self.with_state(|state| state.jump_target(slide))
    }

    pub fn wrap_as_slide(&self, state: NodeId) -> ProvenanceResult<NodeId> {
        self.with_state_mut(|s| s.wrap_as_slide(state))
    }

    pub fn make_text_slide(&self, title: Option<&str>) -> ProvenanceResult<NodeId> {
        self.with_state_mut(|s| s.make_text_slide(title))
    }

    /// Creates a story presenting `states`, framed by a title and a closing
    /// slide; the new story is selected
    pub fn extract_slide(&self, states: &[NodeId]) -> ProvenanceResult<NodeId> {
        let first = self.with_state_mut(|s| s.extract_slide(states))?;
        self.select_slide(DEFAULT_SELECTION, SelectOperation::Set, Some(first));
        Ok(first)
    }

    /// Starts a story with a text slide, followed by one slide per state
    pub fn start_new_slide(&self, title: Option<&str>, states: &[NodeId]) -> ProvenanceResult<NodeId> {
        self.with_state_mut(|s| {
            for state in states {
                s.ensure_state(*state)?;
            }
            let start = s.make_text_slide(title)?;
            if let Some(&first) = s.chain_state_slides(states)?.first() {
                s.store.add_edge(start, EdgeKind::Next, first)?;
            }
            s.emit(ProvenanceEvent::StartNewSlide { id: start });
            Ok(start)
        })
    }

    /// Copies a slide's presentation into a new, unlinked slide
    pub fn clone_single_slide_node(&self, slide: NodeId) -> ProvenanceResult<NodeId> {
        self.with_state_mut(|s| {
            let source = s.slide(slide)?.clone();
            let clone = match s.jump_target(slide) {
                Some(state) => s.wrap_as_slide(state)?,
                None => s.make_text_slide(None)?,
            };
            s.store.update_node(clone, |record| {
                if let NodeRecord::Story(node) = record {
                    node.copy_presentation_from(&source);
                }
            })?;
            Ok(clone)
        })
    }

    /// Changes a slide's presentation attributes
    pub fn update_slide(&self, slide: NodeId, update: impl FnOnce(&mut SlideNode)) -> ProvenanceResult<()> {
        self.with_state_mut(|s| {
            s.slide(slide)?;
            s.store.update_node(slide, |record| {
                if let NodeRecord::Story(node) = record {
                    update(node);
                }
            })?;
            Ok(())
        })
    }

    /// Moves `to_insert` next to `slide`
    pub fn insert_into_slide(&self, to_insert: NodeId, slide: NodeId, before: bool) -> ProvenanceResult<()> {
        self.move_slide(to_insert, slide, before)
    }

    /// Moves `elem` to the end of the story containing `slide`
    pub fn append_to_slide(&self, slide: NodeId, elem: NodeId) -> ProvenanceResult<()> {
        self.with_state_mut(|s| {
            s.slide(slide)?;
            let start = s.story_start(slide);
            let last = s.slide_path(start).last().copied().unwrap_or(slide);
            s.move_slide(elem, last, false)
        })
    }

    /// Moves a slide before or after `to`, closing the gap it leaves
    pub fn move_slide(&self, node: NodeId, to: NodeId, before: bool) -> ProvenanceResult<()> {
        self.with_state_mut(|s| s.move_slide(node, to, before))
    }

    /// Removes one slide, linking its neighbours
    pub fn remove_slide_node(&self, slide: NodeId) -> ProvenanceResult<()> {
        self.with_state_mut(|s| s.remove_slide_node(slide))
    }

    /// Removes the whole story containing `slide`
    pub fn remove_full_slide(&self, slide: NodeId) -> ProvenanceResult<()> {
        self.with_state_mut(|s| {
            s.slide(slide)?;
            let start = s.story_start(slide);
            for id in s.slide_path(start) {
                s.remove_slide_node(id)?;
            }
            Ok(())
        })
    }

    /// Points a slide at another state, or at none
    pub fn set_slide_jump_to_target(&self, slide: NodeId, state: Option<NodeId>) -> ProvenanceResult<()> {
        self.with_state_mut(|s| s.set_slide_jump_to_target(slide, state))
    }

    pub fn select_slide(&self, selection: &str, operation: SelectOperation, id: Option<NodeId>) {
        self.select(SelectionTarget::Slide, selection, operation, id);
    }

    pub fn selected_slides(&self, selection: &str) -> Vec<NodeId> {
        self.with_state(|state| state.selections.get(SelectionTarget::Slide, selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GraphBase;
    use crate::models::GraphDesc;
    use crate::services::{CommandRegistry, GraphEnvironment};
    use std::sync::Arc;

    fn graph() -> ProvenanceGraph {
        ProvenanceGraph::new(
            GraphBase::in_memory(GraphDesc::in_memory("test")),
            GraphEnvironment::new(Arc::new(CommandRegistry::new())),
        )
        .unwrap()
    }

    fn titles(g: &ProvenanceGraph, path: &[NodeId]) -> Vec<String> {
        path.iter().map(|id| g.slide(*id).unwrap().name).collect()
    }

    #[tokio::test]
    async fn extract_slide_frames_states() {
        let g = graph();
        let start = g.act();
        let first = g.extract_slide(&[start]).unwrap();

        let path = g.slide_path(first);
        assert_eq!(titles(&g, &path), vec!["Unnamed Story", "Start", "Thanks"]);
        assert_eq!(g.slide_jump_target(path[1]), Some(start));
        assert_eq!(g.slide_chains(), vec![first]);
        assert_eq!(g.selected_slides(DEFAULT_SELECTION), vec![first]);
    }

    #[tokio::test]
    async fn move_slide_before_links_once() {
        let g = graph();
        let a = g.make_text_slide(Some("a")).unwrap();
        let b = g.make_text_slide(Some("b")).unwrap();
        let c = g.make_text_slide(Some("c")).unwrap();
        g.move_slide(b, a, false).unwrap();
        g.move_slide(c, b, true).unwrap();

        assert_eq!(titles(&g, &g.slide_path(a)), vec!["a", "c", "b"]);
        let edges_c_b = g.with_store(|store| {
            store
                .outgoing(c, EdgeKind::Next)
                .iter()
                .filter(|e| e.target == b)
                .count()
        });
        assert_eq!(edges_c_b, 1);
    }

    #[tokio::test]
    async fn remove_slide_node_closes_gap() {
        let g = graph();
        let first = g.start_new_slide(Some("intro"), &[g.act()]).unwrap();
        let path = g.slide_path(first);
        assert_eq!(path.len(), 2);
        let end = g.make_text_slide(None).unwrap();
        g.append_to_slide(first, end).unwrap();

        g.remove_slide_node(path[1]).unwrap();
        assert_eq!(g.slide_path(first), vec![first, end]);

        g.remove_full_slide(end).unwrap();
        assert!(g.slides().is_empty());
    }

    #[tokio::test]
    async fn jump_target_can_be_replaced_and_cleared() {
        let g = graph();
        let start = g.act();
        let slide = g.make_text_slide(None).unwrap();
        g.set_slide_jump_to_target(slide, Some(start)).unwrap();
        assert_eq!(g.slide_jump_target(slide), Some(start));
        g.set_slide_jump_to_target(slide, None).unwrap();
        assert_eq!(g.slide_jump_target(slide), None);

        let clone = g.clone_single_slide_node(slide).unwrap();
        assert_eq!(g.slide(clone).unwrap().name, g.slide(slide).unwrap().name);
    }
}
