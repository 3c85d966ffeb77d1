//! 복부 통증 데이터셋 - 지식베이스 원천 데이터
//!
//! 구조화된 의료 정보(원인, 응급 증상, 가정 요법 등)를 담고 있으며,
//! 질문/답변 시드로 펼쳐져 지식베이스 항목이 됩니다.
//! 지식 파일은 데이터셋 형태 또는 `[{question, answer}]` 목록 형태를 받습니다.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 원인 질환
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    pub condition: String,
    pub description: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
}

/// 가정 요법
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeRemedy {
    pub remedy: String,
    pub description: String,
}

/// 구조화된 증상 데이터셋
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalDataset {
    pub symptom: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub causes: Vec<Cause>,
    #[serde(default)]
    pub common_symptoms: Vec<String>,
    #[serde(default)]
    pub emergency_symptoms: Vec<String>,
    #[serde(default)]
    pub home_remedies: Vec<HomeRemedy>,
    #[serde(default)]
    pub prevention_tips: Vec<String>,
    #[serde(default)]
    pub when_to_see_doctor: Vec<String>,
}

/// 질문/답변 시드 (임베딩 전)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub question: String,
    pub answer: String,
}

/// 지식 파일 형식
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KnowledgeSource {
    Dataset(MedicalDataset),
    Pairs(Vec<QaPair>),
}

impl KnowledgeSource {
    /// JSON 파일 로드
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse knowledge file {}", path.display()))
    }

    /// 지식베이스 시드로 변환
    pub fn into_pairs(self) -> Vec<QaPair> {
        match self {
            Self::Dataset(dataset) => dataset.to_pairs(),
            Self::Pairs(pairs) => pairs,
        }
    }
}

/// 지식 파일 경로가 있으면 로드, 없으면 내장 데이터셋
pub fn load_pairs(path: Option<&Path>) -> Result<Vec<QaPair>> {
    match path {
        Some(path) => {
            let pairs = KnowledgeSource::load(path)?.into_pairs();
            tracing::info!("Loaded {} knowledge pairs from {}", pairs.len(), path.display());
            Ok(pairs)
        }
        None => {
            let pairs = MedicalDataset::builtin().to_pairs();
            tracing::info!("Using built-in dataset ({} knowledge pairs)", pairs.len());
            Ok(pairs)
        }
    }
}

// ============================================================================
// MedicalDataset
// ============================================================================

impl MedicalDataset {
    /// 데이터셋을 질문/답변 시드로 펼침
    ///
    /// 주제별 요약 항목을 먼저, 질환별 항목을 뒤에 둡니다.
    /// 비어 있는 섹션은 건너뜁니다.
    pub fn to_pairs(&self) -> Vec<QaPair> {
        let subject = self.symptom.to_lowercase();
        let mut pairs = Vec::new();

        let mut push = |id: &str, question: String, answer: String| {
            pairs.push(QaPair {
                id: Some(id.to_string()),
                question,
                answer,
            });
        };

        if !self.overview.trim().is_empty() {
            push("overview", format!("What is {}?", subject), self.overview.clone());
        }

        if !self.causes.is_empty() {
            let conditions: Vec<&str> = self.causes.iter().map(|c| c.condition.as_str()).collect();
            push(
                "causes",
                format!("What causes {}?", subject),
                bullet_list(
                    &format!("{} can be caused by various factors including:", capitalize(&subject)),
                    &conditions,
                ),
            );
        }

        if !self.common_symptoms.is_empty() {
            push(
                "symptoms",
                format!("What are the symptoms of {}?", subject),
                bullet_list(
                    &format!("Common symptoms associated with {} include:", subject),
                    &self.common_symptoms,
                ),
            );
        }

        if !self.emergency_symptoms.is_empty() {
            push(
                "emergency",
                format!("When should I seek emergency medical attention for {}?", subject),
                bullet_list(
                    "Seek immediate medical attention if you experience:",
                    &self.emergency_symptoms,
                ),
            );
        }

        if !self.home_remedies.is_empty() {
            let remedies: Vec<String> = self
                .home_remedies
                .iter()
                .map(|r| format!("{}: {}", r.remedy, r.description))
                .collect();
            push(
                "home-remedies",
                format!("What home remedies help with {}?", subject),
                bullet_list(&format!("For mild {}, you can try:", subject), &remedies),
            );
        }

        if !self.prevention_tips.is_empty() {
            push(
                "prevention",
                format!("How can I prevent {}?", subject),
                bullet_list("To lower your risk:", &self.prevention_tips),
            );
        }

        if !self.when_to_see_doctor.is_empty() {
            push(
                "see-doctor",
                format!("When should I see a doctor about {}?", subject),
                bullet_list("Make an appointment with a doctor for:", &self.when_to_see_doctor),
            );
        }

        for cause in &self.causes {
            let mut answer = format!("{}: {}.", cause.condition, cause.description);
            if !cause.symptoms.is_empty() {
                answer.push_str(&format!(" Common symptoms: {}.", cause.symptoms.join(", ")));
            }
            push(
                &format!("cause-{}", slugify(&cause.condition)),
                format!("What is {}?", cause.condition),
                answer,
            );
        }

        pairs
    }

    /// JSON 파일로 저장 (들여쓰기 포함)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create output directory")?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize dataset")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Dataset saved to {}", path.display());
        Ok(())
    }

    /// 내장 데이터셋 (성인 복부 통증)
    pub fn builtin() -> Self {
        fn strings(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        fn cause(condition: &str, description: &str, symptoms: &[&str]) -> Cause {
            Cause {
                condition: condition.to_string(),
                description: description.to_string(),
                symptoms: strings(symptoms),
            }
        }

        fn remedy(remedy: &str, description: &str) -> HomeRemedy {
            HomeRemedy {
                remedy: remedy.to_string(),
                description: description.to_string(),
            }
        }

        Self {
            symptom: "abdominal pain in adults".to_string(),
            overview: "Abdominal pain is pain that occurs between the chest and pelvic regions. \
                       It can be crampy, achy, dull, intermittent, or sharp. It's also called a stomachache."
                .to_string(),
            causes: vec![
                cause(
                    "Indigestion",
                    "Discomfort or burning in the upper abdomen, often after eating",
                    &["Bloating", "Nausea", "Feeling full quickly", "Burping"],
                ),
                cause(
                    "Food poisoning",
                    "Illness caused by eating contaminated food",
                    &["Nausea", "Vomiting", "Diarrhea", "Fever", "Stomach cramps"],
                ),
                cause(
                    "Gastroenteritis (Stomach flu)",
                    "Inflammation of the stomach and intestines",
                    &["Watery diarrhea", "Nausea", "Vomiting", "Stomach cramps", "Fever"],
                ),
                cause(
                    "Irritable Bowel Syndrome (IBS)",
                    "Chronic condition affecting the large intestine",
                    &["Cramping", "Bloating", "Gas", "Diarrhea or constipation", "Mucus in stool"],
                ),
                cause(
                    "Constipation",
                    "Infrequent bowel movements or difficult passage of stools",
                    &[
                        "Fewer than 3 bowel movements per week",
                        "Hard, dry stools",
                        "Straining during bowel movements",
                        "Feeling of incomplete evacuation",
                    ],
                ),
                cause(
                    "Appendicitis",
                    "Inflammation of the appendix",
                    &[
                        "Sudden pain in lower right abdomen",
                        "Nausea",
                        "Vomiting",
                        "Loss of appetite",
                        "Fever",
                        "Pain that worsens with movement",
                    ],
                ),
                cause(
                    "Gallstones",
                    "Hardened deposits in the gallbladder",
                    &[
                        "Sudden, intense pain in upper right abdomen",
                        "Pain in right shoulder",
                        "Nausea",
                        "Vomiting",
                        "Back pain",
                    ],
                ),
                cause(
                    "Kidney stones",
                    "Hard deposits of minerals and salts in the kidneys",
                    &[
                        "Severe pain in side and back",
                        "Pain radiating to lower abdomen",
                        "Painful urination",
                        "Pink, red, or brown urine",
                        "Nausea",
                        "Vomiting",
                    ],
                ),
                cause(
                    "Peptic ulcers",
                    "Sores in the lining of the stomach or small intestine",
                    &[
                        "Burning stomach pain",
                        "Feeling of fullness",
                        "Bloating",
                        "Heartburn",
                        "Nausea",
                        "Intolerance to fatty foods",
                    ],
                ),
                cause(
                    "Inflammatory Bowel Disease (IBD)",
                    "Chronic inflammation of the digestive tract",
                    &[
                        "Diarrhea",
                        "Fatigue",
                        "Abdominal pain and cramping",
                        "Blood in stool",
                        "Reduced appetite",
                        "Unintended weight loss",
                    ],
                ),
            ],
            common_symptoms: strings(&[
                "Cramping or sharp pain",
                "Nausea and vomiting",
                "Loss of appetite",
                "Fever",
                "Diarrhea or constipation",
                "Bloating",
                "Heartburn",
                "Pain that radiates to other areas",
            ]),
            emergency_symptoms: strings(&[
                "Severe, sudden abdominal pain",
                "Pain with fever",
                "Pain with vomiting blood",
                "Pain with black, tarry stools",
                "Pain that lasts more than 24 hours",
                "Pain that gets worse over time",
                "Pain with difficulty breathing",
                "Pain with chest pressure",
                "Pain with dizziness or fainting",
                "Pain with rapid heartbeat",
            ]),
            home_remedies: vec![
                remedy("Rest", "Avoid strenuous activity and get plenty of rest"),
                remedy("Heat therapy", "Apply a heating pad or warm compress to the affected area"),
                remedy("Hydration", "Drink clear fluids like water, broth, or clear juices"),
                remedy("Bland diet", "Eat bland foods like rice, toast, bananas, and applesauce"),
                remedy("Avoid irritants", "Stay away from spicy, fatty, or acidic foods"),
                remedy(
                    "Over-the-counter medications",
                    "Consider antacids, pain relievers, or anti-diarrheal medications as appropriate",
                ),
            ],
            prevention_tips: strings(&[
                "Eat a healthy, balanced diet",
                "Stay hydrated",
                "Exercise regularly",
                "Manage stress",
                "Avoid smoking and excessive alcohol",
                "Practice good food hygiene",
                "Get regular medical check-ups",
            ]),
            when_to_see_doctor: strings(&[
                "Pain that is severe or doesn't improve",
                "Pain that interferes with daily activities",
                "Pain accompanied by other concerning symptoms",
                "Pain that recurs frequently",
                "Pain in people over 50 years old",
                "Pain in people with a family history of digestive problems",
            ]),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn bullet_list<S: AsRef<str>>(heading: &str, items: &[S]) -> String {
    let mut text = heading.to_string();
    for item in items {
        text.push_str("\n• ");
        text.push_str(item.as_ref());
    }
    text
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// "Irritable Bowel Syndrome (IBS)" -> "irritable-bowel-syndrome-ibs"
fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_pairs() {
        let pairs = MedicalDataset::builtin().to_pairs();

        // 7개 주제 + 10개 질환
        assert_eq!(pairs.len(), 17);
        assert_eq!(pairs[0].id.as_deref(), Some("overview"));
        assert_eq!(pairs[1].question, "What causes abdominal pain in adults?");
        assert!(pairs[1].answer.contains("• Appendicitis"));

        let appendicitis = pairs
            .iter()
            .find(|p| p.id.as_deref() == Some("cause-appendicitis"))
            .unwrap();
        assert_eq!(appendicitis.question, "What is Appendicitis?");
        assert!(appendicitis.answer.contains("Inflammation of the appendix"));
        assert!(appendicitis.answer.contains("Loss of appetite"));
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let pairs = MedicalDataset::builtin().to_pairs();
        let mut ids: Vec<_> = pairs.iter().filter_map(|p| p.id.clone()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_empty_sections_are_skipped() {
        let dataset = MedicalDataset {
            symptom: "Back pain".to_string(),
            overview: String::new(),
            causes: vec![],
            common_symptoms: vec![],
            emergency_symptoms: vec!["Numbness".to_string()],
            home_remedies: vec![],
            prevention_tips: vec![],
            when_to_see_doctor: vec![],
        };

        let pairs = dataset.to_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(
            pairs[0].question,
            "When should I seek emergency medical attention for back pain?"
        );
        assert_eq!(
            pairs[0].answer,
            "Seek immediate medical attention if you experience:\n• Numbness"
        );
    }

    #[test]
    fn test_load_dataset_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("abdominal_pain_data.json");
        MedicalDataset::builtin().save(&path).unwrap();

        match KnowledgeSource::load(&path).unwrap() {
            KnowledgeSource::Dataset(dataset) => assert_eq!(dataset, MedicalDataset::builtin()),
            KnowledgeSource::Pairs(_) => panic!("expected dataset"),
        }
    }

    #[test]
    fn test_load_pairs_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairs.json");
        std::fs::write(
            &path,
            r#"[{"question": "What is IBS?", "answer": "A chronic bowel condition."}]"#,
        )
        .unwrap();

        let pairs = load_pairs(Some(&path)).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].id, None);
        assert_eq!(pairs[0].answer, "A chronic bowel condition.");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_pairs(Some(Path::new("/nonexistent/kb.json"))).err().unwrap();
        assert!(err.to_string().contains("Failed to read knowledge file"));
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"not": "a dataset"}"#).unwrap();

        assert!(KnowledgeSource::load(&path).is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Irritable Bowel Syndrome (IBS)"), "irritable-bowel-syndrome-ibs");
        assert_eq!(slugify("Gastroenteritis (Stomach flu)"), "gastroenteritis-stomach-flu");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("abdominal pain"), "Abdominal pain");
        assert_eq!(capitalize(""), "");
    }
}
