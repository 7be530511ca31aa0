//! Prayer parameters and prompt construction.
//!
//! The form parameters a user picks (service, style, audience, length,
//! notes) and the single Korean prompt sent to the completion endpoint.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_LENGTH_MINUTES: u8 = 1;
pub const MAX_LENGTH_MINUTES: u8 = 7;

/// Characters of prayer text per minute of reading.
const CHARS_PER_MINUTE: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum ServiceType {
    #[default]
    Sunday,
    Dawn,
    Afternoon,
    Wednesday,
    Friday,
    Christmas,
    Easter,
    Thanksgiving,
}

impl ServiceType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Sunday => "주일예배",
            Self::Dawn => "새벽예배",
            Self::Afternoon => "오후예배",
            Self::Wednesday => "수요예배",
            Self::Friday => "금요기도회",
            Self::Christmas => "성탄절",
            Self::Easter => "부활절",
            Self::Thanksgiving => "추수감사절",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    #[default]
    Traditional,
    Modern,
    Literary,
}

impl Style {
    pub fn label(self) -> &'static str {
        match self {
            Self::Traditional => "전통적",
            Self::Modern => "현대적",
            Self::Literary => "문학적",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum Audience {
    #[default]
    Believer,
    Pastor,
    Elder,
    Children,
    Youth,
    #[value(name = "youngAdult", alias = "young-adult")]
    YoungAdult,
    Adult,
}

impl Audience {
    pub fn label(self) -> &'static str {
        match self {
            Self::Believer => "성도",
            Self::Pastor => "목회자",
            Self::Elder => "장로",
            Self::Children => "어린이",
            Self::Youth => "청소년",
            Self::YoungAdult => "청년",
            Self::Adult => "장년",
        }
    }
}

macro_rules! display_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

display_label!(ServiceType, Style, Audience);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("prayer length must be 1-7 minutes, got {0}")]
    LengthOutOfRange(u8),
}

/// One submission of the prayer form. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrayerRequest {
    pub service_type: ServiceType,
    pub use_prayer_structure: bool,
    pub style: Style,
    pub audience: Audience,
    pub special_notes: String,
    length: u8,
    pub model: String,
}

impl PrayerRequest {
    pub fn new(
        service_type: ServiceType,
        style: Style,
        audience: Audience,
        length: u8,
        model: impl Into<String>,
    ) -> Result<Self, RequestError> {
        if !(MIN_LENGTH_MINUTES..=MAX_LENGTH_MINUTES).contains(&length) {
            return Err(RequestError::LengthOutOfRange(length));
        }
        Ok(Self {
            service_type,
            use_prayer_structure: true,
            style,
            audience,
            special_notes: String::new(),
            length,
            model: model.into(),
        })
    }

    pub fn with_structure(mut self, use_prayer_structure: bool) -> Self {
        self.use_prayer_structure = use_prayer_structure;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.special_notes = notes.into();
        self
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    /// Build the completion prompt for this request.
    pub fn prompt(&self) -> String {
        let structure = if self.use_prayer_structure { "사용" } else { "미사용" };
        let service = self.service_type.label();
        let style = self.style.label();
        let audience = self.audience.label();
        let notes = self.special_notes.trim();
        let length = self.length;
        let length_table = (MIN_LENGTH_MINUTES..=MAX_LENGTH_MINUTES)
            .map(|m| format!("{m}분: {}자", u32::from(m) * CHARS_PER_MINUTE))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"[역할]: 당신은 숙련된 목회자입니다.

[지시]: 예배용 기도문을 마크다운 형식으로 작성해야 합니다.

[파라미터]:
- 예배종류: {service}
- 기도순서구조: {structure}
- 스타일: {style}
- 대상자: {audience}
- 특이사항: {notes}
- 기도문 길이: {length}분

[파라미터 적용]:
1. 반드시 기도문의 작성은 예배종류({service}), 스타일({style}), 대상자({audience})에 맞도록 작성한다.
2. 기도순서구조: {structure} 사용 시 아래 순서에 따라 작성한다.
  예) 찬양→회개→감사→중보(나라, 교회, 성도, 다음 세대)→간구(성도, 선교, 지체, 중직자, 교역자, 설교)→결단
3. 반드시 기도문 길이({length}분)는 아래와 같은 길이에 맞도록 작성한다.
  예) {length_table}
  - 중보와 간구는 다른 기도 순서보다 3~5배 정도로 길게 기도문 길이를 조절한다.
4. 특이사항: {notes} 특이사항을 내용에 맞게 중보 또는 간구에 포함하여 기도문을 작성한다.

[요구사항]:
- 경건하고, 존경과 겸손이 느껴지는 표현을 사용한다.
- 기도문은 한국적 정서를 반영하여 작성한다.
- 성경적 언어(예: "주께서 인도하시나이다", "주의 은혜 안에 거하나이다") 적극 활용한다.
- 찬양, 회개, 감사, 중보, 간구, 결단의 흐름을 자연스럽게 연결한다.
- 기도문에 이단적 사상이나 표현을 일절 포함하지 않는다.
- 각 기도 순서별로 2~4개 이상 문장으로 구성하고, 은혜롭고 간결하게 작성한다.
- 전통적 예배 문맥을 고려해 존댓말을 사용한다.
- 하나님의 위대하심과 은혜를 강조한다.
- 성도들에게 위로와 도전을 주는 표현을 추가한다.
- 반드시 기도문은 낭독하기 편한 형태로 작성한다.
- 기도문의 제일 위에 기도문의 내용에 부합하는 성경구절(개역개정판)을 포함하되 따옴표("")로 구분한다.
- 기도문의 마지막은 반드시 "이 모든 말씀, 우리 구주 예수 그리스도의 이름으로 기도드립니다. 아멘."으로 끝낸다.

[마크다운 형식 요구사항]:
1. 각 기도 섹션(찬양, 회개, 감사 등)의 제목은 기도문에 출력하지 않는다.
2. 각 섹션은 빈 줄로 구분한다.
3. HTML 태그를 사용하지 않는다.
4. 순수 마크다운 문법만 사용한다.
"#
        )
    }
}

/// Display title shared by print, Word export and listings:
/// `date | 예배종류 | 스타일 | 대상자 | N분`.
pub fn document_title(
    date: &str,
    service_type: ServiceType,
    style: Style,
    audience: Audience,
    length: u8,
) -> String {
    format!("{date} | {service_type} | {style} | {audience} | {length}분")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PrayerRequest {
        PrayerRequest::new(ServiceType::Dawn, Style::Modern, Audience::YoungAdult, 3, "gpt-4.1")
            .unwrap()
    }

    #[test]
    fn test_length_bounds() {
        assert_eq!(
            PrayerRequest::new(ServiceType::Sunday, Style::Traditional, Audience::Believer, 0, "m"),
            Err(RequestError::LengthOutOfRange(0))
        );
        assert_eq!(
            PrayerRequest::new(ServiceType::Sunday, Style::Traditional, Audience::Believer, 8, "m"),
            Err(RequestError::LengthOutOfRange(8))
        );
        assert!(PrayerRequest::new(ServiceType::Sunday, Style::Traditional, Audience::Believer, 7, "m").is_ok());
    }

    #[test]
    fn test_prompt_contains_parameters() {
        let prompt = request().with_notes("선교사님 파송").prompt();
        assert!(prompt.contains("- 예배종류: 새벽예배"));
        assert!(prompt.contains("- 스타일: 현대적"));
        assert!(prompt.contains("- 대상자: 청년"));
        assert!(prompt.contains("- 기도문 길이: 3분"));
        assert!(prompt.contains("- 특이사항: 선교사님 파송"));
        assert!(prompt.contains("- 기도순서구조: 사용"));
        assert!(prompt.contains("3분: 900자"));
        assert!(prompt.contains("7분: 2100자"));
    }

    #[test]
    fn test_prompt_structure_toggle() {
        let prompt = request().with_structure(false).prompt();
        assert!(prompt.contains("- 기도순서구조: 미사용"));
    }

    #[test]
    fn test_serde_keys_match_stored_format() {
        assert_eq!(serde_json::to_string(&Audience::YoungAdult).unwrap(), "\"youngAdult\"");
        assert_eq!(serde_json::to_string(&ServiceType::Thanksgiving).unwrap(), "\"thanksgiving\"");
        let style: Style = serde_json::from_str("\"literary\"").unwrap();
        assert_eq!(style, Style::Literary);
    }

    #[test]
    fn test_document_title() {
        let title = document_title(
            "2024-03-10",
            ServiceType::Sunday,
            Style::Traditional,
            Audience::Elder,
            4,
        );
        assert_eq!(title, "2024-03-10 | 주일예배 | 전통적 | 장로 | 4분");
    }
}
