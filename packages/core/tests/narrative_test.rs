//! Integration tests for stories built on top of a provenance graph

#[cfg(test)]
mod narrative_tests {
    use anyhow::Result;
    use std::sync::Arc;
    use trailgraph_core::{
        ActionMeta, ActionSpec, CmdContext, CmdResult, CommandError, CommandRegistry, GraphBase,
        GraphDesc, GraphEnvironment, NodeId, ObjectCategory, ProvenanceError, ProvenanceEvent,
        ProvenanceGraph, DEFAULT_SELECTION, DEFAULT_TEXT_SLIDE_TITLE, STORY_END_TITLE,
        STORY_START_TITLE,
    };

    async fn graph_with_history() -> Result<(ProvenanceGraph, Vec<NodeId>)> {
        let registry = CommandRegistry::new();
        registry.register("step", |_ctx: CmdContext| async move {
            Ok::<_, CommandError>(CmdResult::new())
        });
        let graph = ProvenanceGraph::new(
            GraphBase::in_memory(GraphDesc::in_memory("stories")),
            GraphEnvironment::new(Arc::new(registry)),
        )?;

        let mut states = vec![graph.act()];
        for name in ["Load", "Filter", "Plot"] {
            let outcome = graph
                .push(ActionSpec::new(
                    ActionMeta::new(name, ObjectCategory::Logic),
                    "step",
                ))
                .await?;
            states.push(outcome.state);
        }
        Ok((graph, states))
    }

    fn names(graph: &ProvenanceGraph, slides: &[NodeId]) -> Vec<String> {
        slides
            .iter()
            .filter_map(|id| graph.slide(*id))
            .map(|s| s.name)
            .collect()
    }

    #[tokio::test]
    async fn test_extracted_story_presents_states_in_order() -> Result<()> {
        let (graph, states) = graph_with_history().await?;
        let dim = (graph.actions().len(), graph.states().len());

        let first = graph.extract_slide(&states[1..])?;
        let story = graph.slide_path(first);
        assert_eq!(
            names(&graph, &story),
            vec![STORY_START_TITLE, "Load", "Filter", "Plot", STORY_END_TITLE]
        );
        let targets: Vec<Option<NodeId>> =
            story.iter().map(|s| graph.slide_jump_target(*s)).collect();
        assert_eq!(
            targets,
            vec![None, Some(states[1]), Some(states[2]), Some(states[3]), None]
        );
        assert_eq!(graph.selected_slides(DEFAULT_SELECTION), vec![first]);
        assert_eq!(graph.slide_chains(), vec![first]);

        // slides never change the history itself
        assert_eq!((graph.actions().len(), graph.states().len()), dim);
        Ok(())
    }

    #[tokio::test]
    async fn test_stories_can_be_rearranged() -> Result<()> {
        let (graph, states) = graph_with_history().await?;
        let intro = graph.start_new_slide(Some("Intro"), &states[1..3])?;
        let outro = graph.make_text_slide(None)?;
        assert_eq!(graph.stories_paths().len(), 2);

        graph.append_to_slide(intro, outro)?;
        let story = graph.slide_path(intro);
        assert_eq!(
            names(&graph, &story),
            vec!["Intro", "Load", "Filter", DEFAULT_TEXT_SLIDE_TITLE]
        );
        assert_eq!(graph.stories_paths(), vec![story.clone()]);

        // move the closing slide to the front of the story
        graph.move_slide(outro, intro, true)?;
        assert_eq!(graph.slide_chains(), vec![outro]);
        assert_eq!(
            names(&graph, &graph.slide_path(outro)),
            vec![DEFAULT_TEXT_SLIDE_TITLE, "Intro", "Load", "Filter"]
        );

        graph.remove_slide_node(story[1])?;
        assert_eq!(
            names(&graph, &graph.slide_path(outro)),
            vec![DEFAULT_TEXT_SLIDE_TITLE, "Intro", "Filter"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_full_slide_drops_whole_story() -> Result<()> {
        let (graph, states) = graph_with_history().await?;
        let kept = graph.wrap_as_slide(states[3])?;
        let first = graph.extract_slide(&states[1..3])?;
        let middle = graph.slide_path(first)[2];

        graph.remove_full_slide(middle)?;
        assert_eq!(graph.slides(), vec![kept]);
        assert!(graph.selected_slides(DEFAULT_SELECTION).is_empty());
        assert_eq!(graph.states().len(), states.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_cloned_slide_copies_presentation() -> Result<()> {
        let (graph, states) = graph_with_history().await?;
        let slide = graph.wrap_as_slide(states[2])?;
        graph.update_slide(slide, |node| {
            node.name = "Filtered view".to_string();
            node.description = "Rows above threshold".to_string();
        })?;

        let copy = graph.clone_single_slide_node(slide)?;
        assert_ne!(copy, slide);
        let copied = graph.slide(copy).expect("copy exists");
        assert_eq!(copied.name, "Filtered view");
        assert_eq!(copied.description, "Rows above threshold");
        assert_eq!(graph.slide_jump_target(copy), Some(states[2]));
        // the copy is not linked into any story
        assert_eq!(graph.slide_path(copy), vec![copy]);
        Ok(())
    }

    #[tokio::test]
    async fn test_jump_target_edits_emit_events() -> Result<()> {
        let (graph, states) = graph_with_history().await?;
        let slide = graph.wrap_as_slide(states[1])?;
        let mut events = graph.subscribe();

        graph.set_slide_jump_to_target(slide, Some(states[3]))?;
        graph.set_slide_jump_to_target(slide, None)?;
        assert_eq!(graph.slide_jump_target(slide), None);

        let mut changes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ProvenanceEvent::SetJumpTarget { old, new, .. } = event {
                changes.push((old, new));
            }
        }
        assert_eq!(
            changes,
            vec![(Some(states[1]), Some(states[3])), (Some(states[3]), None)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_slide_edits_reject_unknown_nodes() -> Result<()> {
        let (graph, states) = graph_with_history().await?;
        let slide = graph.make_text_slide(Some("Notes"))?;

        assert!(matches!(
            graph.set_slide_jump_to_target(slide, Some(9_999)),
            Err(ProvenanceError::UnknownState(9_999))
        ));
        assert!(matches!(
            graph.move_slide(states[1], slide, false),
            Err(ProvenanceError::UnknownSlide(_))
        ));
        assert!(matches!(
            graph.extract_slide(&[states[1], 9_999]),
            Err(ProvenanceError::UnknownState(9_999))
        ));
        assert_eq!(graph.slides(), vec![slide]);
        Ok(())
    }

    #[tokio::test]
    async fn test_stories_survive_persist_and_restore() -> Result<()> {
        let (graph, states) = graph_with_history().await?;
        let first = graph.extract_slide(&states[1..])?;
        let story = graph.slide_path(first);

        let restored = ProvenanceGraph::from_dump(
            GraphBase::in_memory(GraphDesc::in_memory("stories")),
            GraphEnvironment::new(Arc::new(CommandRegistry::new())),
            graph.persist(),
        )?;
        assert_eq!(restored.slide_chains(), vec![first]);
        assert_eq!(restored.slide_path(first), story);
        assert_eq!(restored.slide_jump_target(story[1]), Some(states[1]));
        Ok(())
    }
}
