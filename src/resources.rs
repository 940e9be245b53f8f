//! Local financial-resource directory
//!
//! A JSON file maps "City, ST" keys to bundles of local resources (credit
//! unions, counseling centers, state programs, cost-of-living and tax
//! figures). The advice-enhancement path appends a formatted bundle to
//! generated responses. Lookups reread the file, so edits take effect
//! without a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Bundle of local resources for one location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceBundle {
    #[serde(default)]
    pub credit_unions: Vec<CreditUnion>,
    #[serde(default)]
    pub counseling_centers: Vec<CounselingCenter>,
    #[serde(default)]
    pub state_programs: Vec<StateProgram>,
    #[serde(default)]
    pub cost_of_living: Option<CostOfLiving>,
    #[serde(default)]
    pub tax_info: Option<TaxInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditUnion {
    pub name: String,
    pub phone: String,
    pub website: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounselingCenter {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    pub phone: String,
    pub website: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub hours: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateProgram {
    pub name: String,
    pub website: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub eligibility: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostOfLiving {
    pub average_rent_1br: String,
    pub average_rent_2br: String,
    pub monthly_expenses: String,
    pub food_monthly: String,
    pub transportation: String,
    pub utilities: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxInfo {
    pub state_income_tax: String,
    #[serde(default)]
    pub city_income_tax: Option<String>,
    pub sales_tax: String,
    #[serde(default)]
    pub property_tax: Option<String>,
}

/// File-backed directory of local resources.
pub struct ResourceDirectory {
    path: PathBuf,
}

impl ResourceDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<BTreeMap<String, ResourceBundle>> {
        if !self.path.exists() {
            warn!("resource file {} not found", self.path.display());
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resources for a location, or `None` when the directory has no entry.
    pub fn lookup(&self, city: &str, state: &str) -> Result<Option<ResourceBundle>> {
        let key = format!("{city}, {state}");
        Ok(self.load()?.remove(&key))
    }

    /// All locations the directory knows about.
    pub fn available_locations(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }
}

/// Format a bundle into the readable appendix attached to advice responses.
pub fn format_resources(resources: &ResourceBundle) -> String {
    let mut out = String::from("LOCAL RESOURCES FOR YOUR AREA:\n");

    if !resources.credit_unions.is_empty() {
        out.push_str("\nLocal credit unions:\n");
        for cu in &resources.credit_unions {
            out.push_str(&format!("\n- {}\n", cu.name));
            out.push_str(&format!("  Phone: {}\n", cu.phone));
            out.push_str(&format!("  Website: {}\n", cu.website));
            if !cu.services.is_empty() {
                out.push_str(&format!("  Services: {}\n", cu.services.join(", ")));
            }
            if let Some(notes) = &cu.notes {
                out.push_str(&format!("  Note: {notes}\n"));
            }
        }
    }

    if !resources.counseling_centers.is_empty() {
        out.push_str("\nFree financial counseling:\n");
        for center in &resources.counseling_centers {
            out.push_str(&format!("\n- {}\n", center.name));
            if let Some(location) = &center.location {
                out.push_str(&format!("  Location: {location}\n"));
            }
            out.push_str(&format!("  Phone: {}\n", center.phone));
            out.push_str(&format!("  Website: {}\n", center.website));
            if !center.services.is_empty() {
                out.push_str(&format!("  Services: {}\n", center.services.join(", ")));
            }
            if let Some(hours) = &center.hours {
                out.push_str(&format!("  Hours: {hours}\n"));
            }
        }
    }

    if !resources.state_programs.is_empty() {
        out.push_str("\nState financial programs:\n");
        for program in &resources.state_programs {
            out.push_str(&format!("\n- {}\n", program.name));
            out.push_str(&format!("  Website: {}\n", program.website));
            if let Some(description) = &program.description {
                out.push_str(&format!("  {description}\n"));
            }
            if let Some(eligibility) = &program.eligibility {
                out.push_str(&format!("  Eligibility: {eligibility}\n"));
            }
        }
    }

    if let Some(col) = &resources.cost_of_living {
        out.push_str("\nCost of living in your area:\n");
        out.push_str(&format!("- Average 1BR rent: {}/month\n", col.average_rent_1br));
        out.push_str(&format!("- Average 2BR rent: {}/month\n", col.average_rent_2br));
        out.push_str(&format!("- Monthly expenses: {}\n", col.monthly_expenses));
        out.push_str(&format!("- Food: {}/month\n", col.food_monthly));
        out.push_str(&format!("- Transportation: {}/month\n", col.transportation));
        out.push_str(&format!("- Utilities: {}/month\n", col.utilities));
    }

    if let Some(tax) = &resources.tax_info {
        out.push_str("\nTax information:\n");
        out.push_str(&format!("- State income tax: {}\n", tax.state_income_tax));
        if let Some(city_tax) = &tax.city_income_tax {
            out.push_str(&format!("- City income tax: {city_tax}\n"));
        }
        out.push_str(&format!("- Sales tax: {}\n", tax.sales_tax));
        if let Some(property) = &tax.property_tax {
            out.push_str(&format!("- Property tax: {property}\n"));
        }
    }

    out
}
