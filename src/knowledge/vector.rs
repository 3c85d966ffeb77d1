//! 벡터 유틸리티 - 코사인 유사도 및 최근접 항목 선택

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 [-1.0, 1.0]
///
/// 길이가 다르거나 빈 벡터, 영벡터가 섞이면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// 가장 유사한 벡터의 인덱스와 점수
///
/// 동점이면 먼저 나온 항목을 유지합니다. 후보가 없으면 `None`.
pub fn best_match<'a, I>(query: &[f32], candidates: I) -> Option<(usize, f32)>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut best: Option<(usize, f32)> = None;

    for (index, candidate) in candidates.into_iter().enumerate() {
        let score = cosine_similarity(query, candidate);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }

    best
}

// ============================================================================
// Tests
// ============================================================================
