use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::formats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Basic,
    #[default]
    Comprehensive,
    Custom,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Comprehensive => "comprehensive",
            Self::Custom => "custom",
        }
    }

    /// Lenient parse for form fields; unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "comprehensive" => Some(Self::Comprehensive),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Wraps the caller's prompt in the template for `analysis_type`.
///
/// `basic` and `comprehensive` only apply to data files; anything else gets
/// the generic file template. Requested chart types are appended for data
/// files only.
pub fn build_prompt(
    user_prompt: &str,
    analysis_type: AnalysisType,
    chart_types: &[String],
    file_name: &str,
) -> String {
    let is_data_file = formats::is_data_file(file_name);

    let mut prompt = match analysis_type {
        AnalysisType::Basic if is_data_file => format!(
            "Analyze the uploaded file '{file_name}' and create basic visualizations:\n\
             1. Read and understand the data structure\n\
             2. Create 2-3 key charts showing main trends and patterns\n\
             3. Provide a brief summary of insights\n\
             \n\
             User request: {user_prompt}\n"
        ),
        AnalysisType::Comprehensive if is_data_file => format!(
            "Perform comprehensive data analysis and visualization of '{file_name}':\n\
             \n\
             1. **Data Overview**:\n   \
                - Display first few rows and data structure\n   \
                - Show data types and basic statistics\n   \
                - Identify any data quality issues\n\
             \n\
             2. **Statistical Analysis**:\n   \
                - Summary statistics for all numeric columns\n   \
                - Distribution analysis\n   \
                - Identify outliers and missing values\n\
             \n\
             3. **Visualizations** (save as high-quality PNG files):\n   \
                - Trend analysis (line charts for time series data)\n   \
                - Distribution charts (histograms, box plots)\n   \
                - Comparison charts (bar charts, grouped comparisons)\n   \
                - Correlation analysis (heatmap if multiple numeric columns)\n   \
                - Any domain-specific charts based on data content\n\
             \n\
             4. **Insights & Recommendations**:\n   \
                - Key findings and patterns\n   \
                - Actionable insights\n   \
                - Recommendations for further analysis\n\
             \n\
             User request: {user_prompt}\n\
             \n\
             Please use Python code to create professional, well-labeled charts with appropriate titles and legends.\n"
        ),
        AnalysisType::Custom => format!(
            "Analyze the uploaded file '{file_name}' based on this specific request:\n\
             \n\
             {user_prompt}\n\
             \n\
             Please read the file first, then fulfill the user's specific requirements.\n"
        ),
        _ => format!(
            "Analyze the uploaded file '{file_name}':\n\
             \n\
             {user_prompt}\n\
             \n\
             Please read and process the file content appropriately.\n"
        ),
    };

    if is_data_file && !chart_types.is_empty() {
        prompt.push_str("\n\nAdditionally, make sure to create these specific chart types: ");
        prompt.push_str(&chart_types.join(", "));
    }
    prompt
}
