use super::{
    Message, MessageKind, SessionError, SessionResult, SessionState, TcpTransport, Transport,
    read_ciphertexts, read_shape, write_ciphertexts, write_shape,
};
use crate::config::SessionConfig;
use crate::crypto::{CkksContext, CkksEvaluator, KeySet};
use crate::exec::HeTensor;
use crate::graph::ElementType;
use crate::handle::HeValue;
use crate::kernel::{NonlinearOp, nonlinear_with_key};
use crate::wire::{ensure_consumed, read_params, write_public_key, write_relin_key};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::sync::Arc;

/// Key material built from the server's parameters.
struct ClientKeys {
    keys: KeySet,
    evaluator: CkksEvaluator,
}

/// The secret-key holder's end of a client-assisted evaluation.
///
/// Parameters are fixed at construction. [`Session::run`] drives the state
/// machine until the server delivers the result or something fails; the
/// connection is closed on every exit path.
pub struct Session<T: Transport = TcpTransport> {
    transport: T,
    state: SessionState,
    config: SessionConfig,
    element_type: ElementType,
    inputs: Vec<f64>,
    shape: Vec<usize>,
    keys: Option<ClientKeys>,
    result: Option<Vec<f64>>,
}

impl Session<TcpTransport> {
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        inputs: Vec<f64>,
        shape: Vec<usize>,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        debug!("session {}", SessionState::Connecting);
        let transport = TcpTransport::connect(addr, config.timeout)?;
        Ok(Self::with_transport(transport, inputs, shape, config))
    }
}

impl<T: Transport> Session<T> {
    /// Session over an already established connection.
    pub fn with_transport(
        transport: T,
        inputs: Vec<f64>,
        shape: Vec<usize>,
        config: SessionConfig,
    ) -> Self {
        info!("session {} -> {}", SessionState::Connecting, SessionState::Ready);
        Self {
            transport,
            state: SessionState::Ready,
            config,
            element_type: ElementType::F32,
            inputs,
            shape,
            keys: None,
            result: None,
        }
    }

    pub fn with_element_type(mut self, element_type: ElementType) -> Self {
        self.element_type = element_type;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn result(&self) -> Option<&[f64]> {
        self.result.as_deref()
    }

    pub fn context(&self) -> Option<&Arc<CkksContext>> {
        self.keys.as_ref().map(|k| k.evaluator.shared_context())
    }

    /// Serves the server until it sends the result.
    pub fn run(&mut self) -> SessionResult<Vec<f64>> {
        while self.state != SessionState::Done {
            let step = self
                .transport
                .receive()
                .and_then(|message| self.handle_message(message));
            if let Err(e) = step {
                warn!("session aborted in state {}: {e}", self.state);
                self.finish();
                return Err(e);
            }
        }
        self.result.clone().ok_or(SessionError::Closed)
    }

    /// Dispatches one message. Messages arriving after `Done` are dropped.
    pub fn handle_message(&mut self, message: Message) -> SessionResult<()> {
        match (self.state, message.kind) {
            (SessionState::Done, kind) => {
                warn!("ignoring {kind} after session end");
                Ok(())
            }
            (SessionState::Ready, MessageKind::Parameters) => self.handle_parameters(&message),
            (SessionState::AwaitingRequest, MessageKind::ReluRequest) => {
                self.handle_request(&message, None)
            }
            (SessionState::AwaitingRequest, MessageKind::BoundedReluRequest) => {
                let mut cursor = Cursor::new(message.payload.as_slice());
                let alpha = cursor.read_f64::<LittleEndian>()?;
                self.handle_request(&message, Some(alpha))
            }
            (SessionState::AwaitingRequest, MessageKind::Result) => self.handle_result(&message),
            (state, kind) => Err(SessionError::UnexpectedMessage { state, kind }),
        }
    }

    fn transition(&mut self, next: SessionState) {
        info!("session {} -> {next}", self.state);
        self.state = next;
    }

    fn finish(&mut self) {
        self.transport.close();
        if self.state != SessionState::Done {
            self.transition(SessionState::Done);
        }
    }

    /// Builds the context and keys, publishes the evaluation keys and sends
    /// the encrypted inputs.
    fn handle_parameters(&mut self, message: &Message) -> SessionResult<()> {
        let mut cursor = Cursor::new(message.payload.as_slice());
        let params = read_params(&mut cursor)?;
        ensure_consumed(&cursor)?;
        let context = Arc::new(CkksContext::new(params)?);
        let mut rng = ChaCha20Rng::seed_from_u64(self.config.seed);
        let keys = KeySet::generate(&context, &mut rng)?;
        let evaluator = CkksEvaluator::new(
            Arc::clone(&context),
            keys.public.clone(),
            keys.relin.clone(),
            self.config.seed.wrapping_add(1),
        )?;

        let mut payload = Vec::new();
        write_public_key(&keys.public, &context, &mut payload)?;
        write_relin_key(&keys.relin, &context, &mut payload)?;
        self.transport
            .send(&Message::new(MessageKind::EvaluationKeys, 0, payload))?;

        let packing = self.config.packing();
        let tensor = HeTensor::encrypt(
            self.element_type,
            self.shape.clone(),
            self.config.batch_size,
            &self.inputs,
            packing,
            &evaluator,
        )?;
        let handles: Vec<_> = tensor
            .values()
            .iter()
            .filter_map(|v| match v {
                HeValue::Cipher(c) => Some(c.clone()),
                HeValue::Plain(_) => None,
            })
            .collect();
        let mut payload = Vec::new();
        payload.write_u8(packing.is_complex() as u8)?;
        payload.write_u8(self.element_type.code())?;
        payload.write_u64::<LittleEndian>(self.config.batch_size as u64)?;
        write_shape(&self.shape, &mut payload)?;
        write_ciphertexts(&handles, &context, &mut payload)?;
        self.transport.send(&Message::new(
            MessageKind::Execute,
            handles.len() as u64,
            payload,
        ))?;

        self.keys = Some(ClientKeys { keys, evaluator });
        self.transition(SessionState::AwaitingRequest);
        Ok(())
    }

    fn handle_request(&mut self, message: &Message, alpha: Option<f64>) -> SessionResult<()> {
        self.transition(SessionState::Processing);
        let op = alpha.map_or(NonlinearOp::Relu, |alpha| NonlinearOp::BoundedRelu { alpha });
        let Some(ClientKeys { keys, evaluator }) = self.keys.as_ref() else {
            return Err(missing_keys(message.kind));
        };
        let context = evaluator.shared_context();

        let mut cursor = Cursor::new(message.payload.as_slice());
        if alpha.is_some() {
            cursor.set_position(8);
        }
        let packing = self.config.packing();
        let batch = read_ciphertexts(&mut cursor, message.count, context, packing)?;
        ensure_consumed(&cursor)?;
        debug!("evaluating {op} on {} ciphertexts", batch.len());

        let lanes = self.config.batch_size;
        let response = batch
            .par_iter()
            .map(|h| nonlinear_with_key(h, op, lanes, &keys.secret, evaluator))
            .collect::<Result<Vec<_>, _>>()?;
        let mut payload = Vec::new();
        write_ciphertexts(&response, context, &mut payload)?;
        self.transport.send(&Message::new(
            MessageKind::ReluResponse,
            response.len() as u64,
            payload,
        ))?;
        self.transition(SessionState::AwaitingRequest);
        Ok(())
    }

    fn handle_result(&mut self, message: &Message) -> SessionResult<()> {
        let Some(ClientKeys { keys, evaluator }) = self.keys.as_ref() else {
            return Err(missing_keys(message.kind));
        };
        let context = evaluator.shared_context();
        let mut cursor = Cursor::new(message.payload.as_slice());
        let shape = read_shape(&mut cursor)?;
        let handles = read_ciphertexts(&mut cursor, message.count, context, self.config.packing())?;
        ensure_consumed(&cursor)?;

        let values = handles.into_iter().map(HeValue::Cipher).collect();
        let tensor = HeTensor::new(self.element_type, shape, self.config.batch_size, values)?;
        let result = tensor.decrypt(Some(&keys.secret), context)?;
        info!("received result of {} values", result.len());
        self.result = Some(result);
        self.finish();
        Ok(())
    }
}

/// Requests before the handshake completed.
fn missing_keys(kind: MessageKind) -> SessionError {
    SessionError::UnexpectedMessage {
        state: SessionState::Ready,
        kind,
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}
