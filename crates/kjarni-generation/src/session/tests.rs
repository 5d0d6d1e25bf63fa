use super::*;

use std::sync::Arc;

use crate::model_config::KvLayout;
use crate::tensor::{ENCODER_ATTENTION_MASK, ENCODER_HIDDEN_STATES};
use crate::tests::common::{MockDecoder, MockEncoder, Probe, LAYERS};
use ndarray::Array1;

fn argmax(logits: &Array1<f32>) -> u32 {
    crate::ops::argmax(logits).unwrap()
}

fn layout() -> KvLayout {
    KvLayout { num_layers: LAYERS, num_kv_heads: 1, head_dim: 2 }
}

// =========================================================================
//  Decoder-only
// =========================================================================

#[test]
fn test_decoder_prefill_then_decode_grows_cache() {
    let probe = Probe::new();
    let mut session = DecoderOnlySession::new(Box::new(MockDecoder::new(probe.clone(), vec![])), None);

    let logits = session.prefill(&[3, 4, 5]).unwrap();
    assert_eq!(argmax(&logits), 6);
    assert_eq!(session.cache_sequence_length(), 3);

    let logits = session.decode(6).unwrap();
    assert_eq!(argmax(&logits), 7);
    assert_eq!(session.cache_sequence_length(), 4);

    session.decode(7).unwrap();
    assert_eq!(session.cache_sequence_length(), 5);
    assert_eq!(probe.input_ids(), vec![vec![3, 4, 5], vec![6], vec![7]]);
}

#[test]
fn test_decoder_feeds_past_and_mask() {
    let probe = Probe::new();
    let mut session = DecoderOnlySession::new(Box::new(MockDecoder::new(probe.clone(), vec![])), None)
        .with_position_ids(true);
    session.prefill(&[1, 2]).unwrap();
    session.decode(3).unwrap();

    assert_eq!(probe.input_names(0), vec!["attention_mask", "input_ids", "position_ids"]);
    let runs = probe.runs.lock().unwrap();
    let second = &runs[1];
    assert_eq!(second["attention_mask"].shape(), &[1, 3]);
    assert_eq!(
        second["position_ids"].as_i64().unwrap().iter().copied().collect::<Vec<_>>(),
        vec![2]
    );
    assert_eq!(second["past_key_values.1.value"].shape(), &[1, 1, 2, 2]);
}

#[test]
fn test_decoder_with_layout_sends_empty_past_on_prefill() {
    let probe = Probe::new();
    let mut session =
        DecoderOnlySession::new(Box::new(MockDecoder::new(probe.clone(), vec![])), Some(layout()));
    session.prefill(&[1, 2]).unwrap();

    let runs = probe.runs.lock().unwrap();
    assert_eq!(runs[0]["past_key_values.0.key"].shape(), &[1, 1, 0, 2]);
    assert_eq!(runs[0].len(), 2 + 2 * LAYERS);
}

#[test]
fn test_decode_before_prefill_is_an_error() {
    let mut session = DecoderOnlySession::new(Box::new(MockDecoder::new(Probe::new(), vec![])), None);
    assert!(matches!(session.decode(1), Err(GenerationError::Session(_))));
    assert!(matches!(session.prefill(&[]), Err(GenerationError::Session(_))));
}

#[test]
fn test_prefill_requires_reset() {
    let mut session = DecoderOnlySession::new(Box::new(MockDecoder::new(Probe::new(), vec![])), None);
    session.prefill(&[1]).unwrap();
    assert!(matches!(session.prefill(&[1]), Err(GenerationError::Session(_))));

    session.reset_cache();
    assert_eq!(session.cache_sequence_length(), 0);
    session.prefill(&[1]).unwrap();
}

#[test]
fn test_reset_behaves_like_fresh_session() {
    let run = |session: &mut DecoderOnlySession| {
        let mut ids = vec![argmax(&session.prefill(&[2, 3]).unwrap())];
        for _ in 0..3 {
            let next = argmax(&session.decode(*ids.last().unwrap()).unwrap());
            ids.push(next);
        }
        ids
    };
    let probe = Probe::new();
    let mut session =
        DecoderOnlySession::new(Box::new(MockDecoder::new(probe.clone(), vec![5, 6, 7, 8])), Some(layout()));
    let first = run(&mut session);
    session.reset_cache();
    let second = run(&mut session);
    assert_eq!(first, vec![5, 6, 7, 8]);
    assert_eq!(first, second);

    let runs = probe.runs.lock().unwrap();
    assert_eq!(runs[4]["past_key_values.0.key"].shape(), &[1, 1, 0, 2]);
}

#[test]
fn test_backend_failure_propagates() {
    let probe = Probe::new();
    let mut session = DecoderOnlySession::new(
        Box::new(MockDecoder::new(probe.clone(), vec![]).failing_on(1)),
        None,
    );
    session.prefill(&[1]).unwrap();
    let err = session.decode(2).unwrap_err();
    assert!(matches!(err, GenerationError::Backend { stage: "decode", .. }));
    assert!(!session.is_closed());
    session.close().unwrap();
    assert_eq!(probe.close_count(), 1);
}

#[test]
fn test_close_is_idempotent_and_drop_does_not_double_close() {
    let probe = Probe::new();
    {
        let mut session =
            DecoderOnlySession::new(Box::new(MockDecoder::new(probe.clone(), vec![])), None);
        session.close().unwrap();
        session.close().unwrap();
        assert!(session.is_closed());
        assert!(matches!(session.prefill(&[1]), Err(GenerationError::Closed)));
    }
    assert_eq!(probe.close_count(), 1);
}

#[test]
fn test_drop_closes_backend() {
    let probe = Probe::new();
    drop(DecoderOnlySession::new(Box::new(MockDecoder::new(probe.clone(), vec![])), None));
    assert_eq!(probe.close_count(), 1);
}

// =========================================================================
//  Encoder-decoder
// =========================================================================

fn seq2seq(enc: &Arc<Probe>, dec: &Arc<Probe>, layout: Option<KvLayout>) -> EncoderDecoderSession {
    EncoderDecoderSession::new(
        Box::new(MockEncoder::new(enc.clone())),
        Box::new(MockDecoder::seq2seq(dec.clone(), vec![])),
        0,
        layout,
    )
}

#[test]
fn test_encoder_decoder_prefill_primes_with_start_token() {
    let (enc, dec) = (Probe::new(), Probe::new());
    let mut session = seq2seq(&enc, &dec, None);

    let logits = session.prefill(&[7, 8, 9, 2]).unwrap();
    assert_eq!(argmax(&logits), 1, "start token 0 predicts 1");
    assert_eq!(enc.input_ids(), vec![vec![7, 8, 9, 2]]);
    assert_eq!(dec.input_ids(), vec![vec![0]]);
    assert_eq!(session.cache_sequence_length(), 1);
    assert_eq!(session.encoder_sequence_length(), 4);
}

#[test]
fn test_encoder_runs_once_and_cross_state_is_reused() {
    let (enc, dec) = (Probe::new(), Probe::new());
    let mut session = seq2seq(&enc, &dec, None);
    session.prefill(&[7, 8, 9]).unwrap();
    session.decode(1).unwrap();
    session.decode(2).unwrap();

    assert_eq!(enc.run_count(), 1);
    assert_eq!(session.cache_sequence_length(), 3);

    let runs = dec.runs.lock().unwrap();
    for inputs in runs.iter() {
        assert_eq!(inputs[ENCODER_HIDDEN_STATES].shape(), &[1, 3, 4]);
        assert_eq!(inputs[ENCODER_ATTENTION_MASK].shape(), &[1, 3]);
    }
    assert!(!runs[0].contains_key("past_key_values.0.encoder.key"));
    // Cross tensors are frozen at the encoder length, self tensors grow.
    assert_eq!(runs[2]["past_key_values.0.encoder.key"].shape(), &[1, 1, 3, 2]);
    assert_eq!(runs[2]["past_key_values.0.decoder.key"].shape(), &[1, 1, 2, 2]);
}

#[test]
fn test_encoder_decoder_layout_sends_empty_past() {
    let (enc, dec) = (Probe::new(), Probe::new());
    let mut session = seq2seq(&enc, &dec, Some(layout()));
    session.prefill(&[5]).unwrap();
    let runs = dec.runs.lock().unwrap();
    assert_eq!(runs[0]["past_key_values.1.decoder.value"].shape(), &[1, 1, 0, 2]);
    assert_eq!(runs[0]["past_key_values.1.encoder.value"].shape(), &[1, 1, 0, 2]);
}

#[test]
fn test_encoder_decoder_reset_reencodes() {
    let (enc, dec) = (Probe::new(), Probe::new());
    let mut session = seq2seq(&enc, &dec, None);
    session.prefill(&[5, 6]).unwrap();
    session.decode(1).unwrap();
    session.reset_cache();
    assert_eq!(session.cache_sequence_length(), 0);
    assert_eq!(session.encoder_sequence_length(), 0);

    session.prefill(&[5]).unwrap();
    assert_eq!(enc.run_count(), 2);
    let runs = dec.runs.lock().unwrap();
    assert_eq!(runs[2][ENCODER_HIDDEN_STATES].shape(), &[1, 1, 4]);
    assert!(!runs[2].contains_key("past_key_values.0.decoder.key"));
}

#[test]
fn test_open_releases_encoder_when_decoder_fails() {
    let enc = Probe::new();
    let enc_for_factory = enc.clone();
    let result = EncoderDecoderSession::open(
        move || Ok(Box::new(MockEncoder::new(enc_for_factory)) as Box<dyn ForwardBackend>),
        || Err(anyhow::anyhow!("decoder file missing")),
        0,
        None,
    );
    assert!(matches!(result, Err(GenerationError::Backend { stage: "open decoder", .. })));
    assert_eq!(enc.close_count(), 1);
}

#[test]
fn test_encoder_decoder_close_releases_both_once() {
    let (enc, dec) = (Probe::new(), Probe::new());
    let mut session: AnySession = seq2seq(&enc, &dec, None).into();
    assert!(session.is_encoder_decoder());
    session.close().unwrap();
    session.close().unwrap();
    drop(session);
    assert_eq!(enc.close_count(), 1);
    assert_eq!(dec.close_count(), 1);
}
