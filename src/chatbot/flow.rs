//! Flow graph helpers: navigation clean-up and editor graph compilation

use crate::models::ChatBotQuestion;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FlowError {
    #[error("시작 노드가 필요합니다.")]
    MissingStart,
}

/// Drop pointers to questions that are missing or inactive.
/// `active_ids` holds the active question ids of the question's flow.
pub fn normalize_navigation(question: &mut ChatBotQuestion, active_ids: &HashSet<i64>) {
    let keep = |id: Option<i64>| id.filter(|id| active_ids.contains(id));
    question.next_question_id_a = keep(question.next_question_id_a);
    question.next_question_id_b = keep(question.next_question_id_b);

    if question.next_question_ids.is_some() {
        let ids: Vec<i64> = question
            .next_ids()
            .into_iter()
            .filter(|id| active_ids.contains(id))
            .collect();
        question.next_question_ids = if ids.is_empty() {
            None
        } else {
            Some(Value::from(ids))
        };
    }
}

/// Node as sent by the flow editor
#[derive(Debug, Clone, Deserialize)]
pub struct EditorNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: EditorNodeData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditorNodeData {
    pub label: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditorEdge {
    pub source: String,
    pub target: String,
}

/// Question ready to insert. Links refer to positions in `CompiledFlow::questions`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuestion {
    pub node_id: String,
    pub question_text: String,
    pub question_type: &'static str,
    pub information: Option<String>,
    pub option_a: Option<String>,
    pub option_b: Option<String>,
    pub order: Decimal,
    pub next_a: Option<usize>,
    pub next_b: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFlow {
    pub start: Option<usize>,
    pub questions: Vec<CompiledQuestion>,
}

/// Turn an editor graph into storable questions.
///
/// Start and end nodes are not stored. `question` nodes become `choice`
/// questions carrying their first two options; `text` and `ai` nodes become
/// `info` questions. The edge leaving the start node picks the start question.
/// For a choice with both options the first edge fills A and later edges fill B;
/// any other source keeps only its last edge, in A.
pub fn compile_flow(nodes: &[EditorNode], edges: &[EditorEdge]) -> Result<CompiledFlow, FlowError> {
    let start_node = nodes
        .iter()
        .find(|n| n.kind == "start")
        .ok_or(FlowError::MissingStart)?;

    // start first, end last, everything else in editor order
    let mut sorted: Vec<&EditorNode> = nodes.iter().collect();
    sorted.sort_by_key(|n| match n.kind.as_str() {
        "start" => 0,
        "end" => 2,
        _ => 1,
    });

    let mut questions = Vec::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();

    for node in sorted {
        if node.kind == "start" || node.kind == "end" {
            continue;
        }

        let text = node
            .data
            .content
            .clone()
            .or_else(|| node.data.label.clone())
            .unwrap_or_default();

        let (question_type, option_a, option_b, information) = match node.kind.as_str() {
            "question" => (
                "choice",
                node.data.options.first().cloned(),
                node.data.options.get(1).cloned(),
                None,
            ),
            "text" | "ai" => (
                "info",
                None,
                None,
                Some(node.data.content.clone().unwrap_or_default()),
            ),
            _ => ("info", None, None, None),
        };

        index_of.insert(node.id.as_str(), questions.len());
        questions.push(CompiledQuestion {
            node_id: node.id.clone(),
            question_text: text,
            question_type,
            information,
            option_a,
            option_b,
            order: Decimal::from(questions.len() as i64 + 1),
            next_a: None,
            next_b: None,
        });
    }

    let mut start = None;
    for edge in edges {
        let Some(&target) = index_of.get(edge.target.as_str()) else {
            continue;
        };

        if edge.source == start_node.id {
            start = Some(target);
            continue;
        }

        let Some(&source) = index_of.get(edge.source.as_str()) else {
            continue;
        };

        let question = &mut questions[source];
        if question.option_a.is_some() && question.option_b.is_some() {
            if question.next_a.is_none() {
                question.next_a = Some(target);
            } else {
                question.next_b = Some(target);
            }
        } else {
            question.next_a = Some(target);
        }
    }

    Ok(CompiledFlow { start, questions })
}
