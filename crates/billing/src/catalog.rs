//! Plan catalog lookup
//!
//! Resolves internal plan codes to catalog entries and to the external
//! pricing lookup keys used by the current payment provider. Lookups sit on
//! hot paths, so "no mapping" is an expected `None`, never an error.

use serde::{Deserialize, Serialize};
use texhub_shared::{Plan, Settings};

/// Suffix carried by the legacy trial variants of the individual plans.
/// A trial code prices and classifies identically to its base code.
const FREE_TRIAL_SUFFIX: &str = "_free_trial_7_days";

const ANNUAL_SUFFIX: &str = "-annual";

/// Coarse plan family derived from the code's naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Individual,
    Student,
    Group,
}

/// Billing period derived from the code's naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }
}

/// Plan family and billing period for analytics and pricing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanClassification {
    pub plan_type: PlanType,
    pub period: BillingPeriod,
}

/// A legacy group plan code resolved to its canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedGroupPlan {
    pub plan_code: String,
    pub quantity: u32,
}

/// Read-only view over the configured plan catalog.
pub struct PlanCatalog<'a> {
    settings: &'a Settings,
}

impl<'a> PlanCatalog<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Exact-match, case-sensitive lookup by plan code.
    pub fn find_plan(&self, plan_code: &str) -> Option<&'a Plan> {
        self.settings.plans.iter().find(|plan| plan.code == plan_code)
    }

    /// Whether the code belongs to a group plan. Legacy group codes that are
    /// no longer in the catalog are recognized by their prefix.
    pub fn is_group_plan_code(&self, plan_code: &str) -> bool {
        match self.find_plan(plan_code) {
            Some(plan) => plan.group_plan,
            None => plan_code.starts_with("group_"),
        }
    }

    /// Map an internal plan or add-on code to the provider's pricing lookup
    /// key: `{family}_{interval}_{version}_{currency}`.
    ///
    /// `billing_cycle_interval` only disambiguates codes that don't encode
    /// their own interval (the standalone AI add-on code); suffixed codes
    /// ignore it. Unknown codes and missing inputs yield `None`.
    pub fn build_provider_lookup_key(
        &self,
        code: &str,
        currency: &str,
        billing_cycle_interval: Option<BillingPeriod>,
    ) -> Option<String> {
        if code.is_empty() || currency.is_empty() {
            return None;
        }

        let base = code.strip_suffix(FREE_TRIAL_SUFFIX).unwrap_or(code);
        let (family, period) = match base.strip_suffix(ANNUAL_SUFFIX) {
            Some(stem) => (stem, BillingPeriod::Annual),
            None => (base, billing_cycle_interval.unwrap_or(BillingPeriod::Monthly)),
        };

        match family {
            "collaborator" | "professional" | "student" | "assistant" => Some(format!(
                "{}_{}_{}_{}",
                family,
                period.as_str(),
                self.settings.catalog_version_tag,
                currency.to_lowercase()
            )),
            _ => None,
        }
    }

    /// Derive the plan family and billing period from the code's naming
    /// convention. Trial codes classify as their monthly base plan.
    pub fn classify_plan(&self, plan_code: &str) -> PlanClassification {
        let base = plan_code.strip_suffix(FREE_TRIAL_SUFFIX).unwrap_or(plan_code);
        let (stem, period) = match base.strip_suffix(ANNUAL_SUFFIX) {
            Some(stem) => (stem, BillingPeriod::Annual),
            None => (base, BillingPeriod::Monthly),
        };
        let plan_type = if stem.starts_with("group") {
            PlanType::Group
        } else if stem.starts_with("student") {
            PlanType::Student
        } else {
            PlanType::Individual
        };
        PlanClassification { plan_type, period }
    }

    /// Rewrite a legacy group plan code to its canonical form.
    ///
    /// Legacy codes embed the seat count and a tier suffix, e.g.
    /// `group_collaborator_10_enterprise`. Non-matching codes pass through
    /// with a quantity of 1.
    pub fn normalize_group_plan_code(&self, plan_code: &str) -> NormalizedGroupPlan {
        let pass_through = NormalizedGroupPlan {
            plan_code: plan_code.to_string(),
            quantity: 1,
        };

        if !plan_code.starts_with("group_") {
            return pass_through;
        }
        let stem = match plan_code
            .strip_suffix("_enterprise")
            .or_else(|| plan_code.strip_suffix("_educational"))
        {
            Some(stem) => stem,
            None => return pass_through,
        };
        let (canonical, quantity_part) = match stem.rsplit_once('_') {
            Some(parts) => parts,
            None => return pass_through,
        };
        match quantity_part.parse::<u32>() {
            Ok(quantity) if quantity >= 1 => NormalizedGroupPlan {
                plan_code: canonical.to_string(),
                quantity,
            },
            _ => pass_through,
        }
    }
}
