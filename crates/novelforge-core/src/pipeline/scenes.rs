//! Scene planning and scene writing (§4.2 steps 4-5). Planning asks the
//! Chapter Architect for a structured scene list; writing walks that list
//! scene by scene, carrying forward a short tail of prior prose as context
//! the way the teacher's `Ghostwriter` equivalent threads `last_context`
//! between calls instead of re-sending the whole chapter each time.

use crate::agents::{AgentAdapter, AgentRequest, AgentRole};
use crate::error::{OrchestratorError, Result};
use crate::model::{ScenePlan, WorldBible};

use super::constraints::ConsistencyConstraints;
use super::OutlineEntry;

/// Characters of trailing prose carried from one scene into the next
/// scene's prompt as continuity context.
const LAST_CONTEXT_CHARS: usize = 600;

fn agent_err(role: AgentRole, source: crate::error::AgentError) -> OrchestratorError {
    OrchestratorError::AgentCall {
        role: role.as_str().to_string(),
        source,
    }
}

/// Step 4: asks the Chapter Architect for a scene-by-scene plan for this
/// chapter. Falls back to a single whole-chapter scene if the response
/// can't be parsed as the expected JSON array, rather than failing the
/// pipeline outright on a malformed plan.
pub async fn plan_scenes(
    architect: &dyn AgentAdapter,
    world_bible: &WorldBible,
    entry: &OutlineEntry,
    constraints: &ConsistencyConstraints,
    anti_repetition_advice: &[String],
) -> Result<Vec<ScenePlan>> {
    let mut prompt = format!(
        "Plan the scenes for chapter {} (\"{}\").\nSummary: {}\nKey event: {}\n\n{}",
        entry.number,
        entry.title,
        entry.summary,
        entry.key_event,
        constraints.to_prompt_block(),
    );
    if !anti_repetition_advice.is_empty() {
        prompt.push_str("\n\nANTI-REPETITION ADVICE:\n");
        prompt.push_str(&anti_repetition_advice.join("\n"));
    }
    prompt.push_str(
        "\n\nRespond with a JSON array of scenes, each with index, summary, pov_character, goal, target_word_count.",
    );

    let request = AgentRequest::new(
        AgentRole::ChapterArchitect,
        "You are the chapter architect: break a chapter summary into a concrete scene-by-scene plan.",
        prompt,
    )
    .with_context(serde_json::to_string(world_bible).unwrap_or_default());

    let response = architect
        .execute(request)
        .await
        .map_err(|e| agent_err(AgentRole::ChapterArchitect, e))?;

    match serde_json::from_str::<Vec<ScenePlan>>(&response.content) {
        Ok(scenes) if !scenes.is_empty() => Ok(scenes),
        _ => Ok(vec![ScenePlan {
            index: 0,
            summary: entry.summary.clone(),
            pov_character: None,
            goal: Some(entry.key_event.clone()),
            target_word_count: None,
        }]),
    }
}

/// Result of writing every scene in a chapter's plan: the concatenated
/// chapter draft plus the trailing context needed to seed the next chapter.
#[derive(Debug, Clone)]
pub struct SceneWriteOutcome {
    pub content: String,
    pub last_context: String,
}

/// Step 5: writes each planned scene in order, threading a short tail of
/// prior prose forward as continuity context for the next scene's prompt.
pub async fn write_scenes(
    writer: &dyn AgentAdapter,
    world_bible: &WorldBible,
    constraints: &ConsistencyConstraints,
    scene_plan: &[ScenePlan],
) -> Result<SceneWriteOutcome> {
    let mut content = String::new();
    let mut last_context = String::new();

    for scene in scene_plan {
        let mut prompt = format!(
            "Write scene {} of the chapter.\nSummary: {}\n",
            scene.index, scene.summary
        );
        if let Some(pov) = &scene.pov_character {
            prompt.push_str(&format!("POV character: {pov}\n"));
        }
        if let Some(goal) = &scene.goal {
            prompt.push_str(&format!("Scene goal: {goal}\n"));
        }
        if let Some(target) = scene.target_word_count {
            prompt.push_str(&format!("Target word count: {target}\n"));
        }
        prompt.push_str(&constraints.to_prompt_block());
        if !last_context.is_empty() {
            prompt.push_str(&format!("\n\nContinue directly from:\n...{last_context}"));
        }

        let request = AgentRequest::new(
            AgentRole::Ghostwriter,
            "You are the ghostwriter: produce polished prose for a single scene, continuing seamlessly from prior context.",
            prompt,
        )
        .with_context(serde_json::to_string(world_bible).unwrap_or_default());

        let response = writer
            .execute(request)
            .await
            .map_err(|e| agent_err(AgentRole::Ghostwriter, e))?;

        if !content.is_empty() {
            content.push_str("\n\n");
        }
        content.push_str(response.content.trim());

        last_context = tail(&content, LAST_CONTEXT_CHARS);
    }

    Ok(SceneWriteOutcome { content, last_context })
}

fn tail(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        text.to_string()
    } else {
        chars[chars.len() - max_chars..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentResponse;
    use crate::model::TokenUsage;
    use async_trait::async_trait;

    struct StubWriter;

    #[async_trait]
    impl AgentAdapter for StubWriter {
        fn role(&self) -> AgentRole {
            AgentRole::Ghostwriter
        }

        async fn execute(&self, request: AgentRequest) -> std::result::Result<AgentResponse, crate::error::AgentError> {
            Ok(AgentResponse {
                content: format!("prose for: {}", request.user_prompt.lines().next().unwrap_or("")),
                usage: TokenUsage::default(),
                model: "stub".into(),
            })
        }
    }

    fn empty_bible() -> WorldBible {
        WorldBible {
            project_id: "p1".into(),
            characters: vec![],
            rules_summary: vec![],
            relationships_summary: vec![],
            plot_outline: None,
            locations: vec![],
            objects: vec![],
            as_of_chapter: 1,
        }
    }

    #[tokio::test]
    async fn write_scenes_concatenates_every_scene() {
        let scenes = vec![
            ScenePlan {
                index: 0,
                summary: "opening".into(),
                pov_character: None,
                goal: None,
                target_word_count: None,
            },
            ScenePlan {
                index: 1,
                summary: "closing".into(),
                pov_character: None,
                goal: None,
                target_word_count: None,
            },
        ];
        let writer = StubWriter;
        let constraints = ConsistencyConstraints::default();
        let outcome = write_scenes(&writer, &empty_bible(), &constraints, &scenes).await.unwrap();
        assert!(outcome.content.contains("opening"));
        assert!(outcome.content.contains("closing"));
    }

    #[tokio::test]
    async fn last_context_tracks_tail_of_latest_scene() {
        let scenes = vec![ScenePlan {
            index: 0,
            summary: "a".into(),
            pov_character: None,
            goal: None,
            target_word_count: None,
        }];
        let writer = StubWriter;
        let constraints = ConsistencyConstraints::default();
        let outcome = write_scenes(&writer, &empty_bible(), &constraints, &scenes).await.unwrap();
        assert!(!outcome.last_context.is_empty());
    }
}
