//! Prompt rendering
//!
//! The analysis service treats prompts as opaque strings produced by a
//! [`PromptRenderer`]. [`DefaultPromptRenderer`] ships built-in templates; deployments
//! with their own template store implement the trait instead.

use crate::analysis::persona::{ContentType, PersonaType, ProjectType};

/// Request-level facts a template may reference
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub project_id: u64,
    pub project_type: ProjectType,
    pub content_type: Option<ContentType>,
    pub max_categories: usize,
    pub max_main_summary_chars: usize,
    pub max_category_summary_chars: usize,
}

pub trait PromptRenderer: Send + Sync {
    fn system_instruction(&self, persona: PersonaType) -> Option<String>;

    /// `contents_json` is the compact projection of the input items.
    fn structuring_prompt(&self, context: &PromptContext, contents_json: &str, schema_notes: &str)
    -> String;

    /// `input_json` is the reduced projection of the structuring result.
    fn refinement_prompt(
        &self,
        context: &PromptContext,
        input_json: &str,
        persona: PersonaType,
        schema_notes: &str,
    ) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptRenderer;

impl DefaultPromptRenderer {
    fn content_label(content_type: Option<ContentType>) -> &'static str {
        match content_type {
            Some(ContentType::Support) => "support messages",
            Some(ContentType::Suggestion) => "suggestions",
            Some(ContentType::Review) => "reviews",
            Some(ContentType::Satisfaction) => "satisfaction survey answers",
            None => "user comments",
        }
    }

    fn tone(persona: PersonaType) -> &'static str {
        match persona {
            PersonaType::CustomerFacingSmartBot | PersonaType::CustomerFacingAnalyst => {
                "Write for shoppers browsing the project page: friendly, concrete and neutral \
                 toward the seller."
            }
            _ => "Write for an internal analyst: precise, factual and free of marketing language.",
        }
    }
}

impl PromptRenderer for DefaultPromptRenderer {
    fn system_instruction(&self, persona: PersonaType) -> Option<String> {
        persona.role().map(|role| {
            format!(
                "You are a {}. You analyze user-generated content from a commerce platform \
                 and answer only with data grounded in that content.",
                role
            )
        })
    }

    fn structuring_prompt(
        &self,
        context: &PromptContext,
        contents_json: &str,
        schema_notes: &str,
    ) -> String {
        let label = Self::content_label(context.content_type);
        format!(
            "Analyze the following {label} for {project_type} project {project_id}.\n\n\
             Tasks:\n\
             1. Group the {label} into at most {max_categories} categories. Use short category \
             names; the key of a category is its name with spaces replaced by underscores.\n\
             2. For each category, list the ids of positive items (score >= 0.5) and negative \
             items (score < 0.5), and set the sentiment from the average score: below 0.4 is \
             negative, 0.6 or above is positive, anything else is neutral.\n\
             3. Quote short highlights verbatim from the items, with the id they came from.\n\
             4. Put ids of abusive, spam or personal-data items in harmful_contents and ids of \
             items that fit no category in etc_contents with a reason. An id may appear in only \
             one of harmful_contents, etc_contents or a single category.\n\
             5. Write an overall summary.\n\
             Items marked has_image include a photo the text may refer to.\n\n\
             {schema_notes}\n\
             Items (JSON):\n{contents_json}\n",
            label = label,
            project_type = context.project_type,
            project_id = context.project_id,
            max_categories = context.max_categories,
            schema_notes = schema_notes,
            contents_json = contents_json,
        )
    }

    fn refinement_prompt(
        &self,
        context: &PromptContext,
        input_json: &str,
        persona: PersonaType,
        schema_notes: &str,
    ) -> String {
        format!(
            "Rewrite the analysis below for {project_type} project {project_id}.\n\n\
             Rules:\n\
             - The overall summary must be at most {main} characters.\n\
             - Each category summary must be at most {category} characters.\n\
             - Keep every category key exactly as given and do not add new keys.\n\
             - Return refined keywords for the whole analysis and for each category.\n\
             - {tone}\n\n\
             {schema_notes}\n\
             Analysis (JSON):\n{input_json}\n",
            project_type = context.project_type,
            project_id = context.project_id,
            main = context.max_main_summary_chars,
            category = context.max_category_summary_chars,
            tone = Self::tone(persona),
            schema_notes = schema_notes,
            input_json = input_json,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PromptContext {
        PromptContext {
            project_id: 42,
            project_type: ProjectType::Funding,
            content_type: Some(ContentType::Review),
            max_categories: 20,
            max_main_summary_chars: 300,
            max_category_summary_chars: 50,
        }
    }

    #[test]
    fn test_structuring_prompt_embeds_inputs() {
        let prompt = DefaultPromptRenderer.structuring_prompt(
            &context(),
            r#"[{"id":1,"content":"fast"}]"#,
            "## Response Schema Field Descriptions",
        );
        assert!(prompt.contains("reviews for funding project 42"));
        assert!(prompt.contains("at most 20 categories"));
        assert!(prompt.contains(r#"[{"id":1,"content":"fast"}]"#));
        assert!(prompt.contains("## Response Schema Field Descriptions"));
    }

    #[test]
    fn test_refinement_prompt_limits_and_tone() {
        let prompt = DefaultPromptRenderer.refinement_prompt(
            &context(),
            "{}",
            PersonaType::CustomerFacingSmartBot,
            "",
        );
        assert!(prompt.contains("at most 300 characters"));
        assert!(prompt.contains("at most 50 characters"));
        assert!(prompt.contains("shoppers"));
    }

    #[test]
    fn test_system_instruction_uses_role() {
        let instruction = DefaultPromptRenderer
            .system_instruction(PersonaType::ProDataAnalyst)
            .unwrap();
        assert!(instruction.starts_with("You are a Precise Data Analyst."));
        assert!(DefaultPromptRenderer
            .system_instruction(PersonaType::CommonTokenCounter)
            .is_none());
    }
}
