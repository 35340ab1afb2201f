use anyhow::Result;

use crate::models::FoodAnalysisResult;

/// Trait for food analysis backends (the two-stage OpenAI pipeline, test stubs)
#[async_trait::async_trait]
pub trait FoodAnalyzer: Send + Sync {
    /// Fails when both inputs are absent. Unrecognized food is not an error:
    /// it comes back as an error-flagged result.
    async fn analyze(
        &self,
        image_url: Option<&str>,
        text_description: Option<&str>,
    ) -> Result<FoodAnalysisResult>;
}
