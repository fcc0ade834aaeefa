//! Assessment scorer - rolls classified events into risk dimensions
//!
//! Three numerator scores in [0,100] feed a composite mean; categorical
//! ratings fall out of shared thresholds. Output templates keep the
//! executive summary consistent across companies.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    Assessment, ResultBreakdown, RiskColor, RiskRating, SearchResultItem,
};
use crate::utils::SearchWindow;

/// How many high-risk titles make it into key_findings.
const MAX_KEY_FINDINGS: usize = 5;

pub struct AssessmentScorer;

impl AssessmentScorer {
    /// Score one company's classified results for one user and window.
    pub fn score(
        company_name: &str,
        company_vat: Option<String>,
        user_id: &str,
        window: SearchWindow,
        sources_searched: Vec<String>,
        items: &[SearchResultItem],
    ) -> Assessment {
        let total = items.len();

        let high = items.iter().filter(|i| i.risk_level.is_high()).count();
        let medium = items.iter().filter(|i| i.risk_level.is_medium()).count();
        let high_legal = items
            .iter()
            .filter(|i| i.risk_level == crate::models::RiskLabel::HighLegal)
            .count();
        let medium_legal = items
            .iter()
            .filter(|i| i.risk_level == crate::models::RiskLabel::MediumLegal)
            .count();
        let press = items
            .iter()
            .filter(|i| {
                i.source
                    .parse::<crate::models::Source>()
                    .map(|s| s.is_press())
                    .unwrap_or(false)
            })
            .count();

        let (financial_score, legal_score, press_score) = if total == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let total = total as f64;
            (
                100.0 * (0.8 * high as f64 + 0.4 * medium as f64) / total,
                100.0 * (0.9 * high_legal as f64 + 0.5 * medium_legal as f64) / total,
                100.0 * (0.6 * press as f64) / total,
            )
        };
        let composite_score = (financial_score + legal_score + press_score) / 3.0;

        let overall_risk = RiskRating::from_score(composite_score);
        let financial_rating = RiskRating::from_score(financial_score);
        let legal_rating = RiskRating::from_score(legal_score);
        let press_rating = RiskRating::from_score(press_score);

        let low = total - high - medium;
        let breakdown = ResultBreakdown {
            total_results_found: total,
            high_risk_results: high,
            medium_risk_results: medium,
            low_risk_results: low,
        };

        let key_findings: Vec<String> = items
            .iter()
            .filter(|i| i.risk_color == RiskColor::Red)
            .take(MAX_KEY_FINDINGS)
            .map(|i| i.title.clone())
            .collect();

        Assessment {
            assessment_id: Uuid::new_v4().to_string(),
            company_vat,
            user_id: user_id.to_string(),
            company_name: company_name.to_string(),
            // Turnover and shareholding track the financial picture;
            // bankruptcy and legal track the legal one; corruption tracks
            // press coverage.
            turnover_risk: financial_rating,
            shareholding_risk: financial_rating,
            bankruptcy_risk: legal_rating,
            legal_risk: legal_rating,
            corruption_risk: press_rating,
            overall_risk,
            financial_score: round1(financial_score),
            legal_score: round1(legal_score),
            press_score: round1(press_score),
            composite_score: round1(composite_score),
            search_date_range_start: Some(window.start),
            search_date_range_end: Some(window.end),
            sources_searched,
            breakdown,
            analysis_summary: summary_for(company_name, overall_risk, total, high),
            key_findings,
            recommendations: recommendations_for(overall_risk),
            created_at: Utc::now(),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn summary_for(company: &str, overall: RiskRating, total: usize, high: usize) -> String {
    match overall {
        RiskRating::Red => format!(
            "{}: perfil de riesgo ALTO. {} de {} resultados analizados presentan riesgo severo \
             para la cobertura D&O.",
            company, high, total
        ),
        RiskRating::Orange => format!(
            "{}: perfil de riesgo MEDIO. Se detectaron señales que requieren seguimiento \
             ({} resultados, {} de alto riesgo).",
            company, total, high
        ),
        RiskRating::Green => format!(
            "{}: perfil de riesgo BAJO. Sin señales relevantes en los {} resultados analizados.",
            company, total
        ),
    }
}

/// Fixed recommendation templates keyed by overall level.
fn recommendations_for(overall: RiskRating) -> Vec<String> {
    match overall {
        RiskRating::Red => vec![
            "Escalar a suscripción senior antes de emitir o renovar la póliza D&O".to_string(),
            "Solicitar información adicional sobre los procedimientos legales en curso".to_string(),
            "Revisar límites y exclusiones de la cobertura propuesta".to_string(),
        ],
        RiskRating::Orange => vec![
            "Programar una revisión de seguimiento dentro de 90 días".to_string(),
            "Verificar la evolución de los expedientes administrativos detectados".to_string(),
        ],
        RiskRating::Green => {
            vec!["Proceder con el proceso estándar de suscripción".to_string()]
        },
    }
}
