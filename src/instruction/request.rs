//! Abstract requests from the protocol front-end and the blocks they are batched into.

use crate::labware::WellRef;
use crate::liquid::new_id;
use crate::planner::ComponentRequest;
use crate::volume::Volume;
use serde::{Deserialize, Serialize};

/// Move components into one destination well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(default = "new_id")]
    pub id: String,
    pub components: Vec<ComponentRequest>,
    pub destination: WellRef,
    /// Name the destination liquid takes once the components are in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl TransferRequest {
    pub fn new(destination: WellRef) -> Self {
        Self {
            id: new_id(),
            components: Vec::new(),
            destination,
            result: None,
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, volume: Volume) -> Self {
        self.components.push(ComponentRequest::new(name, volume));
        self
    }

    /// Add a component that must come from one liquid instance.
    pub fn with_pinned_component(
        mut self,
        name: impl Into<String>,
        liquid_id: impl Into<String>,
        volume: Volume,
    ) -> Self {
        self.components.push(ComponentRequest {
            liquid_id: Some(liquid_id.into()),
            ..ComponentRequest::new(name, volume)
        });
        self
    }

    pub fn with_result(mut self, name: impl Into<String>) -> Self {
        self.result = Some(name.into());
        self
    }

    pub fn total_volume(&self) -> Volume {
        self.components.iter().map(|c| c.volume).sum()
    }
}

/// Mix a well's contents in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixRequest {
    #[serde(default = "new_id")]
    pub id: String,
    pub well: WellRef,
    pub volume: Volume,
    pub cycles: u32,
}

/// Show a message to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    #[serde(default = "new_id")]
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub pause: bool,
}

/// Give the liquid in a well a new identity so later requests can pin it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    #[serde(default = "new_id")]
    pub id: String,
    pub well: WellRef,
    #[serde(default = "new_id")]
    pub new_liquid_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Transfer(TransferRequest),
    MixInPlace(MixRequest),
    Prompt(PromptRequest),
    Split(SplitRequest),
}

impl Request {
    pub fn id(&self) -> &str {
        match self {
            Request::Transfer(r) => &r.id,
            Request::MixInPlace(r) => &r.id,
            Request::Prompt(r) => &r.id,
            Request::Split(r) => &r.id,
        }
    }
}

/// A batch of requests planned together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    Transfer { requests: Vec<TransferRequest> },
    Mix { requests: Vec<MixRequest> },
    Split { requests: Vec<SplitRequest> },
    Prompt { requests: Vec<PromptRequest> },
}

impl Block {
    /// A block holding one request.
    pub fn single(request: Request) -> Block {
        match request {
            Request::Transfer(r) => Block::Transfer { requests: vec![r] },
            Request::MixInPlace(r) => Block::Mix { requests: vec![r] },
            Request::Split(r) => Block::Split { requests: vec![r] },
            Request::Prompt(r) => Block::Prompt { requests: vec![r] },
        }
    }

    /// Append a request of this block's kind, handing it back otherwise.
    pub fn absorb(&mut self, request: Request) -> Result<(), Request> {
        match (self, request) {
            (Block::Transfer { requests }, Request::Transfer(r)) => requests.push(r),
            (Block::Mix { requests }, Request::MixInPlace(r)) => requests.push(r),
            (Block::Split { requests }, Request::Split(r)) => requests.push(r),
            (Block::Prompt { requests }, Request::Prompt(r)) => requests.push(r),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    /// Batch consecutive requests of the same kind, preserving order.
    pub fn from_requests(requests: impl IntoIterator<Item = Request>) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for request in requests {
            let rejected = match blocks.last_mut() {
                Some(last) => last.absorb(request),
                None => Err(request),
            };
            if let Err(request) = rejected {
                blocks.push(Block::single(request));
            }
        }
        blocks
    }

    pub fn len(&self) -> usize {
        match self {
            Block::Transfer { requests } => requests.len(),
            Block::Mix { requests } => requests.len(),
            Block::Split { requests } => requests.len(),
            Block::Prompt { requests } => requests.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labware::WellCoords;

    fn dest() -> WellRef {
        WellRef::new("plate", WellCoords::new(0, 0))
    }

    #[test]
    fn test_blocks_batch_consecutive_kinds() {
        let requests = vec![
            Request::Transfer(TransferRequest::new(dest()).with_component("water", Volume::ul(10.0))),
            Request::Transfer(TransferRequest::new(dest()).with_component("dye", Volume::ul(1.0))),
            Request::Prompt(PromptRequest {
                id: new_id(),
                message: "spin down".into(),
                pause: true,
            }),
            Request::Transfer(TransferRequest::new(dest()).with_component("water", Volume::ul(10.0))),
        ];
        let blocks = Block::from_requests(requests);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].len(), 2);
        assert!(matches!(blocks[1], Block::Prompt { .. }));
    }

    #[test]
    fn test_request_json_shape() {
        let json = r#"{
            "type": "transfer",
            "components": [{"name": "water", "volume": 25.0}],
            "destination": {"plate_id": "p1", "well": {"x": 2, "y": 0}},
            "result": "diluted"
        }"#;
        let request: Request = serde_json::from_str(json).unwrap();
        let Request::Transfer(t) = request else {
            panic!("expected a transfer");
        };
        assert_eq!(t.total_volume(), Volume::ul(25.0));
        assert!(!t.id.is_empty());
    }
}
