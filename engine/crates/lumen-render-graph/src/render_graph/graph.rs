//! 依赖图和拓扑排序

use std::collections::{HashMap, VecDeque};

use crate::render_graph::error::RgError;

/// Pass 之间的依赖图
///
/// 边从 producer 指向 consumer，重复的边只计一次
pub struct RgDependencyGraph {
    pass_count: usize,
    /// 出边
    adjacency: Vec<Vec<usize>>,
    in_degrees: Vec<usize>,
    edge_count: usize,
}

impl RgDependencyGraph {
    pub fn new(pass_count: usize) -> Self {
        Self {
            pass_count,
            adjacency: vec![Vec::new(); pass_count],
            in_degrees: vec![0; pass_count],
            edge_count: 0,
        }
    }

    /// 添加依赖：`consumer` 必须在 `producer` 之后执行
    ///
    /// 返回是否加入了新边。自环会被忽略。
    pub fn add_edge(&mut self, producer: usize, consumer: usize) -> Result<bool, RgError> {
        for index in [producer, consumer] {
            if index >= self.pass_count {
                return Err(RgError::InvalidPass { index });
            }
        }
        if producer == consumer {
            log::warn!("render graph: pass {} depends on itself, ignored", producer);
            return Ok(false);
        }
        if self.adjacency[producer].contains(&consumer) {
            return Ok(false);
        }

        self.adjacency[producer].push(consumer);
        self.in_degrees[consumer] += 1;
        self.edge_count += 1;
        Ok(true)
    }

    /// Kahn 算法
    ///
    /// 队列按声明顺序初始化，没有依赖关系的 Pass 保持声明顺序。
    ///
    /// # 返回
    /// - `Ok(order)`: 执行顺序
    /// - `Err(remaining)`: 存在环，返回没能排进顺序的 Pass
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut queue = (0..self.pass_count).filter(|&i| in_degrees[i] == 0).collect::<VecDeque<_>>();
        let mut order = Vec::with_capacity(self.pass_count);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &next in &self.adjacency[node] {
                in_degrees[next] -= 1;
                if in_degrees[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() == self.pass_count {
            Ok(order)
        } else {
            Err((0..self.pass_count).filter(|&i| in_degrees[i] > 0).collect())
        }
    }

    #[inline]
    pub fn successors(&self, pass: usize) -> &[usize] {
        &self.adjacency[pass]
    }

    pub fn predecessors(&self, pass: usize) -> Vec<usize> {
        (0..self.pass_count).filter(|&i| self.adjacency[i].contains(&pass)).collect()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.pass_count
    }
}

/// 从资源访问推断依赖
pub struct RgDependencyAnalyzer;

impl RgDependencyAnalyzer {
    /// 按声明顺序推断 (producer, consumer) 依赖
    ///
    /// - 写后读（RAW）：reader 在最近一次 writer 之后
    /// - 写后写（WAW）：writer 在上一个 writer 之后
    /// - 读后写（WAR）：writer 在上一次写入之后的所有 reader 之后
    ///
    /// `reads[i]` / `writes[i]` 是第 i 个 Pass 访问的资源索引
    pub fn infer(reads: &[Vec<usize>], writes: &[Vec<usize>]) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        let mut last_writer: HashMap<usize, usize> = HashMap::new();
        let mut readers_since_write: HashMap<usize, Vec<usize>> = HashMap::new();

        for (pass, (pass_reads, pass_writes)) in reads.iter().zip(writes).enumerate() {
            for &resource in pass_reads {
                if let Some(&writer) = last_writer.get(&resource) {
                    if writer != pass {
                        edges.push((writer, pass));
                    }
                }
                readers_since_write.entry(resource).or_default().push(pass);
            }

            for &resource in pass_writes {
                if let Some(&writer) = last_writer.get(&resource) {
                    if writer != pass {
                        edges.push((writer, pass));
                    }
                }
                for reader in readers_since_write.remove(&resource).unwrap_or_default() {
                    if reader != pass {
                        edges.push((reader, pass));
                    }
                }
                last_writer.insert(resource, pass);
            }
        }

        edges
    }
}
