//! Tiered project projection.
//!
//! Each tier's view is built field by field from the raw record. Fields not
//! named here never reach a viewer, whatever the raw record carries.

use chrono::{DateTime, Utc};

use crate::models::{
    AccessLevel, NegotiatorProjectView, ProjectAccessData, ProjectRecord, PublicProjectView,
    RegisteredProjectView,
};
use crate::services::fees::FeeCalculator;

#[derive(Debug, Clone, Default)]
pub struct ProjectViewProjector;

impl ProjectViewProjector {
    pub fn project(&self, raw: &ProjectRecord, level: AccessLevel) -> ProjectAccessData {
        self.project_at(raw, level, Utc::now())
    }

    pub fn project_at(
        &self,
        raw: &ProjectRecord,
        level: AccessLevel,
        now: DateTime<Utc>,
    ) -> ProjectAccessData {
        ProjectAccessData {
            access_level: level,
            public: public_view(raw, now),
            registered: (level >= AccessLevel::Registered).then(|| registered_view(raw)),
            negotiator: (level >= AccessLevel::Negotiator).then(|| negotiator_view(raw)),
        }
    }
}

fn public_view(raw: &ProjectRecord, now: DateTime<Utc>) -> PublicProjectView {
    PublicProjectView {
        project_id: raw.project_id,
        title: raw.title.clone(),
        public_description: raw.public_description.clone(),
        category: raw.category.clone(),
        media: raw.media.clone(),
        funding_goal: raw.funding_goal,
        current_funding: raw.current_funding,
        backer_count: raw.backer_count,
        funding_end_utc: raw.funding_end_utc,
        creator_display_name: raw.creator_display_name.clone(),
        funding_expired: FeeCalculator::is_funding_expired(raw, now),
        funding_complete: FeeCalculator::is_funding_complete(raw),
    }
}

fn registered_view(raw: &ProjectRecord) -> RegisteredProjectView {
    RegisteredProjectView {
        full_description: raw.full_description.clone(),
        support_packages: raw.support_packages.clone(),
        team_members: raw.team_members.clone(),
        faq: raw.faq.clone(),
        updates: raw.updates.clone(),
        risk_disclosures: raw.risk_disclosures.clone(),
    }
}

fn negotiator_view(raw: &ProjectRecord) -> NegotiatorProjectView {
    NegotiatorProjectView {
        confidential_description: raw.confidential_description.clone(),
        confidential_documents: raw.confidential_documents.clone(),
        detailed_financials: raw.detailed_financials.clone(),
        business_plan: raw.business_plan.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn project() -> ProjectRecord {
        ProjectRecord {
            project_id: Uuid::new_v4(),
            title: "Solar Co-op".to_string(),
            funding_goal: dec!(10000),
            current_funding: dec!(2500),
            full_description: Some("Full plan".to_string()),
            business_plan: Some("Five year plan".to_string()),
            ..ProjectRecord::default()
        }
    }

    #[test]
    fn test_public_view_omits_higher_tiers() {
        let view = ProjectViewProjector.project(&project(), AccessLevel::Public);
        assert_eq!(view.access_level, AccessLevel::Public);
        assert!(view.registered.is_none());
        assert!(view.negotiator.is_none());
        assert!(!view.public.funding_complete);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("registered").is_none());
        assert_eq!(json["title"], "Solar Co-op");
    }

    #[test]
    fn test_registered_view_adds_registered_fields_only() {
        let view = ProjectViewProjector.project(&project(), AccessLevel::Registered);
        assert_eq!(
            view.registered.unwrap().full_description.as_deref(),
            Some("Full plan")
        );
        assert!(view.negotiator.is_none());
    }

    #[test]
    fn test_negotiator_view_includes_everything() {
        let view = ProjectViewProjector.project(&project(), AccessLevel::Negotiator);
        assert!(view.registered.is_some());
        assert_eq!(
            view.negotiator.unwrap().business_plan.as_deref(),
            Some("Five year plan")
        );
    }
}
