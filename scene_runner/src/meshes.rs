use serde::{Deserialize, Serialize};
use simulation::brickfem::error::ConfigurationError;
use simulation::brickfem::nalgebra::Vector3;
use simulation::brickfem::{Brick9Element, Brick9Settings, MaterialHandle, NodeHandle};
use simulation::{Simulation, SimulationError};

/// A single layer of bricks spanning `[0, lx] x [0, ly] x [0, lz]`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateDescription {
    /// Number of elements along x and y.
    pub num_elements: [usize; 2],
    pub size: [f64; 3],
}

impl PlateDescription {
    pub fn element_dimensions(&self) -> Vector3<f64> {
        let [nx, ny] = self.num_elements;
        Vector3::new(
            self.size[0] / nx as f64,
            self.size[1] / ny as f64,
            self.size[2],
        )
    }

    pub fn num_nodes_per_layer(&self) -> usize {
        let [nx, ny] = self.num_elements;
        (nx + 1) * (ny + 1)
    }
}

/// Handles of the nodes of a plate built by [`create_plate`].
///
/// Corner nodes are stored layer by layer, row by row, with x varying fastest.
#[derive(Clone, Debug)]
pub struct PlateMesh {
    pub description: PlateDescription,
    pub nodes: Vec<NodeHandle>,
    pub elements: usize,
}

impl PlateMesh {
    /// The corner node in column `i`, row `j` and layer `layer` (0 is bottom, 1 is top).
    pub fn node(&self, i: usize, j: usize, layer: usize) -> NodeHandle {
        let num_x = self.description.num_elements[0] + 1;
        self.nodes[layer * self.description.num_nodes_per_layer() + j * num_x + i]
    }

    /// The top corner node at `(lx, ly, lz)`.
    pub fn tip(&self) -> NodeHandle {
        let [nx, ny] = self.description.num_elements;
        self.node(nx, ny, 1)
    }
}

/// Adds a plate of 9-node bricks to the simulation.
///
/// `fixed(i, j, layer)` decides which corner nodes are fixed. Every element gets its own
/// curvature node, the given material and a copy of `settings`.
pub fn create_plate(
    simulation: &mut Simulation,
    description: &PlateDescription,
    material: MaterialHandle,
    settings: &Brick9Settings,
    fixed: impl Fn(usize, usize, usize) -> bool,
) -> Result<PlateMesh, SimulationError> {
    let [nx, ny] = description.num_elements;
    if nx == 0 || ny == 0 {
        return Err(ConfigurationError::InvalidSettings(format!(
            "A plate needs at least one element in each direction, got {} x {}",
            nx, ny
        ))
        .into());
    }

    let dimensions = description.element_dimensions();
    let num_x = nx + 1;
    let num_xy = description.num_nodes_per_layer();

    let mut nodes = Vec::with_capacity(2 * num_xy);
    for layer in 0..2 {
        for j in 0..=ny {
            for i in 0..=nx {
                let position = Vector3::new(
                    i as f64 * dimensions.x,
                    j as f64 * dimensions.y,
                    layer as f64 * dimensions.z,
                );
                nodes.push(simulation.add_node(position, fixed(i, j, layer))?);
            }
        }
    }

    for j in 0..ny {
        for i in 0..nx {
            let n0 = j * num_x + i;
            let bottom = [n0, n0 + 1, n0 + 1 + num_x, n0 + num_x];
            let mut corners = [nodes[0]; 8];
            for (k, &index) in bottom.iter().enumerate() {
                corners[k] = nodes[index];
                corners[k + 4] = nodes[index + num_xy];
            }
            let curvature = simulation.add_curvature_node()?;
            let element = Brick9Element::new(corners, curvature, dimensions)
                .with_material(material)
                .with_settings(settings.clone());
            simulation.add_element(element)?;
        }
    }

    Ok(PlateMesh {
        description: *description,
        nodes,
        elements: nx * ny,
    })
}
