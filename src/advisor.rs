//! Financial-advice prompt construction and location enhancement

use serde::{Deserialize, Serialize};

use crate::resources::{format_resources, ResourceDirectory};

/// Structured profile submitted by the advice form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialProfile {
    pub age: u32,
    /// Annual income in dollars
    pub income: u64,
    /// Total debt in dollars
    pub debt: u64,
    /// Current savings in dollars
    pub savings: u64,
    pub city: String,
    pub state: String,
    pub goals: String,
}

/// Build the detailed advice prompt for a profile.
pub fn build_advice_prompt(profile: &FinancialProfile) -> String {
    format!(
        "You are a professional financial advisor. Provide detailed, actionable financial advice for this person:\n\n\
         Age: {}\n\
         Annual Income: ${}\n\
         Total Debt: ${}\n\
         Current Savings: ${}\n\
         Location: {}, {}\n\
         Financial Goals: {}\n\n\
         Please provide:\n\
         1. A clear assessment of their current financial situation\n\
         2. Prioritized action steps they should take immediately\n\
         3. Long-term financial planning recommendations\n\
         4. Debt management strategies specific to their situation\n\
         5. Savings and investment advice appropriate for their age and income\n\n\
         Be specific, practical, and encouraging. Use bullet points for clarity.",
        profile.age,
        profile.income,
        profile.debt,
        profile.savings,
        profile.city,
        profile.state,
        profile.goals
    )
}

/// Append location-specific resources to a generated response.
///
/// When the directory has nothing for the location, a short note pointing
/// at local alternatives is appended instead.
pub fn enhance_with_location(
    response: &str,
    city: &str,
    state: &str,
    directory: &ResourceDirectory,
) -> String {
    match directory.lookup(city, state) {
        Ok(Some(resources)) => {
            format!("{response}\n\n{}", format_resources(&resources))
        }
        _ => format!(
            "{response}\n\nNote: no specific local resources found for {city}, {state}. \
             Consider searching for local credit unions and financial counseling services in your area."
        ),
    }
}
