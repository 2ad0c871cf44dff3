use anyhow::Result;

/// Calculate cosine similarity directly between two vectors
pub fn cosine_similarity(vec1: &[f32], vec2: &[f32]) -> Result<f32> {
    if vec1.len() != vec2.len() {
        return Err(anyhow::anyhow!(
            "Vector dimensions don't match: {} vs {}",
            vec1.len(),
            vec2.len()
        ));
    }

    let mag1: f32 = vec1.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag2: f32 = vec2.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag1 < 0.001 || mag2 < 0.001 {
        return Err(anyhow::anyhow!("Zero magnitude vector detected"));
    }

    let dot_product: f32 = vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum();
    Ok(dot_product / (mag1 * mag2))
}

/// Coarse locality bucket for an embedding: the sign bits of the first 16
/// dimensions. Used to key the dedup check-then-write lock — near-identical
/// embeddings land in the same bucket with high probability, so the
/// serialized window stays narrow.
pub fn embedding_bucket(embedding: &[f32]) -> u16 {
    let mut bucket = 0u16;
    for (i, &value) in embedding.iter().take(16).enumerate() {
        if value >= 0.0 {
            bucket |= 1 << i;
        }
    }
    bucket
}
